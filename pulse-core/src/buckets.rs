use crate::error::{PipelineError, Result};
use crate::model::{ClassifiedEvent, EventGroup};
use chrono::{DateTime, Duration, DurationRound, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PERIOD_PART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)(d|h|m|s)").expect("Failed to compile period regex")
});

pub const DEFAULT_PERIOD: &str = "1h";

/// Parse compact durations such as `15m`, `1h`, `1h30m` or `2d`.
pub fn parse_period(input: &str) -> Result<Duration> {
    let input = input.trim();
    let mut consumed = 0;
    let mut total = Duration::zero();

    for caps in PERIOD_PART_REGEX.captures_iter(input) {
        let whole = caps.get(0).ok_or_else(|| PipelineError::InvalidPeriod(input.to_string()))?;
        if whole.start() != consumed {
            return Err(PipelineError::InvalidPeriod(input.to_string()));
        }
        consumed = whole.end();

        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| PipelineError::InvalidPeriod(input.to_string()))?;
        let part = match &caps[2] {
            "d" => Duration::try_days(amount),
            "h" => Duration::try_hours(amount),
            "m" => Duration::try_minutes(amount),
            _ => Duration::try_seconds(amount),
        }
        .ok_or_else(|| PipelineError::InvalidPeriod(input.to_string()))?;
        total = total
            .checked_add(&part)
            .ok_or_else(|| PipelineError::InvalidPeriod(input.to_string()))?;
    }

    if consumed != input.len() || total <= Duration::zero() {
        return Err(PipelineError::InvalidPeriod(input.to_string()));
    }
    Ok(total)
}

/// Like [`parse_period`], but an unusable value falls back to `fallback`.
pub fn parse_period_or(input: &str, fallback: Duration) -> Duration {
    match parse_period(input) {
        Ok(period) => period,
        Err(e) => {
            tracing::warn!("{}, using {}", e, format_period(fallback));
            fallback
        }
    }
}

pub fn format_period(period: Duration) -> String {
    let mut secs = period.num_seconds();
    if secs <= 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    out
}

/// Bucket start for a timestamp, aligned to multiples of `period` since the
/// Unix epoch (so `1h` buckets start at the top of the hour).
pub fn bucket_start(timestamp: DateTime<Utc>, period: Duration) -> Result<DateTime<Utc>> {
    timestamp
        .duration_trunc(period)
        .map_err(|e| PipelineError::InvalidPeriod(format!("{}: {}", format_period(period), e)))
}

/// Group events into fixed-width buckets, most recent bucket first and
/// arrival order within a bucket. Events without a timestamp, or with one
/// too far out to align, cannot be placed and are left out.
pub fn group_by_period(events: &[ClassifiedEvent], period: Duration) -> Result<Vec<EventGroup>> {
    if period <= Duration::zero() {
        return Err(PipelineError::InvalidPeriod(format_period(period)));
    }

    let mut buckets: BTreeMap<DateTime<Utc>, Vec<ClassifiedEvent>> = BTreeMap::new();
    let mut unplaced = 0usize;
    for event in events {
        let Some(ts) = event.event.timestamp else {
            unplaced += 1;
            continue;
        };
        match bucket_start(ts, period) {
            Ok(start) => buckets.entry(start).or_default().push(event.clone()),
            Err(e) => {
                tracing::debug!(id = %event.event.id, "Cannot bucket event: {}", e);
                unplaced += 1;
            }
        }
    }

    if unplaced > 0 {
        tracing::debug!(unplaced, "Skipped events without a usable timestamp while bucketing");
    }

    Ok(buckets
        .into_iter()
        .rev()
        .map(|(time, events)| EventGroup {
            time,
            count: events.len(),
            events,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_event;
    use crate::model::RawEvent;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    fn event(id: &str, ts: Option<DateTime<Utc>>) -> ClassifiedEvent {
        let mut raw = RawEvent::new(id, "Pod/api", "pod_killed");
        raw.timestamp = ts;
        classify_event(raw)
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_period("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_period("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_period("2d").unwrap(), Duration::days(2));
        assert!(parse_period("").is_err());
        assert!(parse_period("0m").is_err());
        assert!(parse_period("1x").is_err());
        assert!(parse_period("h1").is_err());
        assert!(parse_period("1h junk").is_err());
    }

    #[test]
    fn test_parse_period_fallback() {
        assert_eq!(parse_period_or("soon", Duration::hours(1)), Duration::hours(1));
        assert_eq!(parse_period_or("5m", Duration::hours(1)), Duration::minutes(5));
    }

    #[test]
    fn test_format_period() {
        assert_eq!(format_period(Duration::minutes(90)), "1h30m");
        assert_eq!(format_period(Duration::days(1)), "1d");
    }

    #[test]
    fn test_hourly_buckets() {
        let events = vec![
            event("a", Some(at(10, 15))),
            event("b", Some(at(10, 45))),
            event("c", Some(at(11, 5))),
        ];

        let groups = group_by_period(&events, Duration::hours(1)).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].time, at(11, 0));
        assert_eq!(groups[0].count, 1);
        assert_eq!(groups[1].time, at(10, 0));
        assert_eq!(groups[1].count, 2);
        let ids: Vec<_> = groups[1].events.iter().map(|e| e.event.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_quarter_hour_alignment_and_gaps() {
        let events = vec![event("a", Some(at(10, 14))), event("b", Some(at(12, 31)))];
        let groups = group_by_period(&events, Duration::minutes(15)).unwrap();
        let times: Vec<_> = groups.iter().map(|g| g.time).collect();
        assert_eq!(times, vec![at(12, 30), at(10, 0)]);
    }

    #[test]
    fn test_unknown_timestamps_skipped() {
        let events = vec![event("a", None), event("b", Some(at(9, 0)))];
        let groups = group_by_period(&events, Duration::hours(1)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 1);
    }

    #[test]
    fn test_out_of_range_timestamp_does_not_fail_grouping() {
        let far = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
        let events = vec![event("a", Some(at(10, 15))), event("b", Some(far))];
        let groups = group_by_period(&events, Duration::hours(1)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].time, at(10, 0));
        assert_eq!(groups[0].count, 1);
    }

    #[test]
    fn test_rejects_non_positive_period() {
        assert!(group_by_period(&[], Duration::zero()).is_err());
        assert!(group_by_period(&[], Duration::minutes(5)).unwrap().is_empty());
    }
}
