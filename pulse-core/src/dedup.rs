//! Collapses repetitive events into grouped occurrences.
//!
//! Events are keyed by `(namespace, resource, category)`. Under
//! [`DedupStrategy::KeyOnly`] every event sharing a key merges into one
//! record regardless of how far apart the members are; the window is only
//! carried along as display metadata. [`DedupStrategy::Rolling`] splits a
//! key group into time boxes of `window_minutes` anchored at each box's
//! first member.

use crate::error::{PipelineError, Result};
use crate::model::{cmp_newest_first, cmp_oldest_first, ClassifiedEvent, DeduplicatedEvent};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Namespace bucket for events without a namespace.
pub const CLUSTER_WIDE: &str = "cluster-wide";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    #[default]
    KeyOnly,
    Rolling,
}

impl std::str::FromStr for DedupStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "key_only" | "key" => Ok(DedupStrategy::KeyOnly),
            "rolling" | "window" => Ok(DedupStrategy::Rolling),
            _ => Err(PipelineError::Config(format!("Unknown dedup strategy: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub namespace: String,
    pub resource: String,
    pub category: String,
}

impl DedupKey {
    pub fn of(event: &ClassifiedEvent) -> Self {
        let raw = &event.event;
        Self {
            namespace: raw
                .namespace
                .clone()
                .unwrap_or_else(|| CLUSTER_WIDE.to_string()),
            resource: raw.resource.clone(),
            category: raw.category_or_type().to_string(),
        }
    }
}

/// Deduplicate with the observed key-only grouping.
pub fn deduplicate(events: &[ClassifiedEvent], window_minutes: u32) -> Result<Vec<DeduplicatedEvent>> {
    deduplicate_with(events, window_minutes, DedupStrategy::KeyOnly)
}

pub fn deduplicate_with(
    events: &[ClassifiedEvent],
    window_minutes: u32,
    strategy: DedupStrategy,
) -> Result<Vec<DeduplicatedEvent>> {
    if window_minutes == 0 {
        return Err(PipelineError::InvalidWindow(window_minutes));
    }
    if events.is_empty() {
        return Ok(Vec::new());
    }

    // Keys in first-seen order so ties in the final sort are stable.
    let mut order: Vec<DedupKey> = Vec::new();
    let mut groups: HashMap<DedupKey, Vec<&ClassifiedEvent>> = HashMap::new();
    for event in events {
        let key = DedupKey::of(event);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(event);
    }

    let window = Duration::minutes(i64::from(window_minutes));
    let mut result = Vec::with_capacity(order.len());
    for key in &order {
        let Some(mut members) = groups.remove(key) else {
            continue;
        };
        members.sort_by(|a, b| cmp_oldest_first(a.event.timestamp, b.event.timestamp));

        match strategy {
            DedupStrategy::KeyOnly => result.push(merge(&members, window_minutes)),
            DedupStrategy::Rolling => {
                for cluster in split_rolling(&members, window) {
                    result.push(merge(cluster, window_minutes));
                }
            }
        }
    }

    result.sort_by(|a, b| {
        b.duplicate_count
            .cmp(&a.duplicate_count)
            .then_with(|| cmp_newest_first(a.event.event.timestamp, b.event.event.timestamp))
    });

    tracing::debug!(
        input = events.len(),
        groups = result.len(),
        ?strategy,
        "Deduplicated events"
    );
    Ok(result)
}

/// Members must be sorted oldest first. Unknown timestamps sort last and
/// therefore join the final box of their key.
fn split_rolling<'a>(members: &'a [&'a ClassifiedEvent], window: Duration) -> Vec<&'a [&'a ClassifiedEvent]> {
    let mut clusters = Vec::new();
    let mut start = 0;
    let mut anchor = members.first().and_then(|m| m.event.timestamp);

    for (idx, member) in members.iter().enumerate().skip(1) {
        if let (Some(anchor_ts), Some(ts)) = (anchor, member.event.timestamp) {
            if ts - anchor_ts > window {
                clusters.push(&members[start..idx]);
                start = idx;
                anchor = Some(ts);
            }
        }
    }
    clusters.push(&members[start..]);
    clusters
}

fn merge(members: &[&ClassifiedEvent], window_minutes: u32) -> DeduplicatedEvent {
    let representative = members[0];

    let known = members.iter().filter_map(|m| m.event.timestamp);
    let first_seen = known.clone().min();
    let last_seen = known.max();

    let mut seen = HashSet::new();
    seen.insert(representative.event.id.as_str());
    let related_events = members[1..]
        .iter()
        .map(|m| m.event.id.as_str())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect();

    DeduplicatedEvent {
        event: representative.clone(),
        duplicate_count: members.len(),
        first_seen,
        last_seen,
        related_events,
        count: members.iter().map(|m| u64::from(m.event.count.max(1))).sum(),
        window_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_event;
    use crate::model::{RawEvent, Severity};
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    fn oom(id: &str, ts: chrono::DateTime<Utc>) -> ClassifiedEvent {
        classify_event(
            RawEvent::new(id, "pod/api-1", "OOMKilled")
                .in_namespace("prod")
                .at(ts),
        )
    }

    #[test]
    fn test_collapses_same_key() {
        let events = vec![oom("a", at(10, 5)), oom("b", at(10, 0)), oom("c", at(10, 2))];

        let result = deduplicate(&events, 5).unwrap();
        assert_eq!(result.len(), 1);
        let group = &result[0];
        assert_eq!(group.duplicate_count, 3);
        assert_eq!(group.id(), "b");
        assert_eq!(group.first_seen, Some(at(10, 0)));
        assert_eq!(group.last_seen, Some(at(10, 5)));
        assert_eq!(group.related_events, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(group.severity(), Severity::Critical);
        assert_eq!(group.count, 3);
        assert_eq!(group.window_minutes, 5);
    }

    #[test]
    fn test_key_only_ignores_span() {
        let events = vec![oom("a", at(1, 0)), oom("b", at(23, 0))];
        let result = deduplicate(&events, 5).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].duplicate_count, 2);
    }

    #[test]
    fn test_rolling_splits_on_window() {
        let events = vec![
            oom("a", at(10, 0)),
            oom("b", at(10, 4)),
            oom("c", at(10, 9)),
            oom("d", at(10, 12)),
        ];

        let result = deduplicate_with(&events, 5, DedupStrategy::Rolling).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].duplicate_count, 2);
        assert_eq!(result[1].duplicate_count, 2);
        // Equal sizes: most recent representative first.
        assert_eq!(result[0].id(), "c");
        assert_eq!(result[1].id(), "a");
    }

    #[test]
    fn test_singleton_group() {
        let result = deduplicate(&[oom("solo", at(9, 30))], 5).unwrap();
        assert_eq!(result[0].duplicate_count, 1);
        assert_eq!(result[0].first_seen, result[0].last_seen);
        assert!(result[0].related_events.is_empty());
    }

    #[test]
    fn test_missing_namespace_is_cluster_wide() {
        let node_a = classify_event(RawEvent::new("n1", "Node/worker-1", "node_ready").at(at(8, 0)));
        let node_b = classify_event(RawEvent::new("n2", "Node/worker-1", "node_ready").at(at(8, 1)));
        let result = deduplicate(&[node_a, node_b], 5).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(DedupKey::of(&result[0].event).namespace, CLUSTER_WIDE);
    }

    #[test]
    fn test_category_falls_back_to_type() {
        let a = classify_event(RawEvent::new("a", "Pod/x", "").with_type("application").at(at(1, 0)));
        let b = classify_event(RawEvent::new("b", "Pod/x", "").with_type("security").at(at(1, 0)));
        assert_eq!(deduplicate(&[a, b], 5).unwrap().len(), 2);
    }

    #[test]
    fn test_related_events_skip_repeated_ids() {
        let events = vec![oom("a", at(10, 0)), oom("b", at(10, 1)), oom("b", at(10, 2)), oom("a", at(10, 3))];
        let result = deduplicate(&events, 5).unwrap();
        assert_eq!(result[0].duplicate_count, 4);
        assert_eq!(result[0].related_events, vec!["b".to_string()]);
    }

    #[test]
    fn test_counts_are_summed() {
        let mut first = oom("a", at(10, 0));
        first.event.count = 4;
        let mut second = oom("b", at(10, 1));
        second.event.count = 6;
        let result = deduplicate(&[first, second], 5).unwrap();
        assert_eq!(result[0].count, 10);
    }

    #[test]
    fn test_output_order() {
        let mut events = vec![oom("a", at(10, 0)), oom("b", at(10, 1))];
        events.push(classify_event(
            RawEvent::new("late", "Pod/other", "pod_killed").in_namespace("prod").at(at(12, 0)),
        ));
        events.push(classify_event(
            RawEvent::new("early", "Pod/third", "pod_killed").in_namespace("prod").at(at(9, 0)),
        ));
        events.push(classify_event(
            RawEvent::new("unknown", "Pod/fourth", "pod_killed").in_namespace("prod"),
        ));

        let ids: Vec<_> = deduplicate(&events, 5)
            .unwrap()
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "late", "early", "unknown"]);
    }

    #[test]
    fn test_empty_and_invalid_window() {
        assert!(deduplicate(&[], 5).unwrap().is_empty());
        assert!(matches!(
            deduplicate(&[oom("a", at(1, 0))], 0),
            Err(PipelineError::InvalidWindow(0))
        ));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("key_only".parse::<DedupStrategy>().unwrap(), DedupStrategy::KeyOnly);
        assert_eq!("Rolling".parse::<DedupStrategy>().unwrap(), DedupStrategy::Rolling);
        assert!("sliding".parse::<DedupStrategy>().is_err());
    }
}
