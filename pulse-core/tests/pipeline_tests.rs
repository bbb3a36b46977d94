//! End-to-end behaviour of the event pipeline through the monitor handle

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::stream;
use pulse_core::source::refresh_once;
use pulse_core::{
    classify, classify_event, deduplicate, BatchOutcome, EventMonitor, EventQuery, EventSource,
    FetchError, FilterChain, LogError, LogErrorQuery, NamespaceFilter, NavigationFilter,
    PulseConfig, RawEvent, RefreshSettings, Severity, SeverityFilter, StreamOutcome, TypeFilter,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
}

fn oom(id: &str, ts: DateTime<Utc>) -> RawEvent {
    RawEvent::new(id, "pod/api-1", "OOMKilled")
        .in_namespace("prod")
        .with_type("infrastructure")
        .at(ts)
}

fn sample_events() -> Vec<RawEvent> {
    vec![
        oom("a", at(10, 0)),
        oom("b", at(10, 2)),
        RawEvent::new("c", "Deployment/web", "deployment_scaled")
            .in_namespace("prod")
            .with_kind("Deployment")
            .with_type("infrastructure")
            .with_severity(Severity::Low)
            .at(at(10, 3)),
        RawEvent::new("d", "Pod/worker", "pod_unhealthy")
            .in_namespace("batch")
            .with_type("infrastructure")
            .with_text("Readiness probe", "container is Unhealthy")
            .at(at(10, 4)),
        RawEvent::new("e", "Service/payments", "http_500")
            .in_namespace("prod")
            .with_type("application")
            .with_severity(Severity::Medium)
            .at(at(10, 6)),
        RawEvent::new("f", "Node/worker-3", "node_disk_pressure")
            .with_type("infrastructure")
            .with_severity(Severity::Info),
    ]
}

async fn loaded_monitor(events: Vec<RawEvent>) -> EventMonitor {
    let (monitor, _handle) = EventMonitor::spawn(&PulseConfig::default()).unwrap();
    let ticket = monitor.begin_fetch().await.unwrap();
    monitor.apply_batch(ticket, Ok(events)).await.unwrap();
    monitor
}

struct ScriptedSource {
    events: Vec<RawEvent>,
    errors: Vec<LogError>,
    failing: AtomicBool,
}

impl ScriptedSource {
    fn new(events: Vec<RawEvent>, errors: Vec<LogError>) -> Self {
        Self {
            events,
            errors,
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<RawEvent>, FetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("connection refused".to_string()));
        }
        Ok(self.events.iter().filter(|e| query.admits(e)).cloned().collect())
    }

    async fn fetch_log_errors(&self, query: &LogErrorQuery) -> Result<Vec<LogError>, FetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("connection refused".to_string()));
        }
        Ok(self.errors.iter().filter(|e| query.admits(e)).cloned().collect())
    }
}

#[test]
fn test_escalation_is_monotonic_and_deterministic() {
    for event in sample_events() {
        for reported in Severity::ALL {
            let event = event.clone().with_severity(reported);
            let severity = classify(&event);
            assert!(severity >= reported, "{} lowered {}", event.id, reported);
            assert_eq!(severity, classify(&event));
        }
    }
}

#[test]
fn test_dedup_conserves_counts() {
    let classified: Vec<_> = sample_events().into_iter().map(classify_event).collect();
    let result = deduplicate(&classified, 5).unwrap();

    let total: usize = result.iter().map(|d| d.duplicate_count).sum();
    assert_eq!(total, classified.len());

    let mut ids: Vec<&str> = result
        .iter()
        .flat_map(|d| std::iter::once(d.id()).chain(d.related_events.iter().map(String::as_str)))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e", "f"]);
}

#[test]
fn test_dedup_of_representatives_is_stable() {
    let classified: Vec<_> = sample_events().into_iter().map(classify_event).collect();
    let first = deduplicate(&classified, 5).unwrap();

    let singletons: Vec<_> = first.iter().map(|d| d.as_singleton()).collect();
    let second = deduplicate(&singletons, 5).unwrap();

    let first_ids: HashSet<_> = first.iter().map(|d| d.id().to_string()).collect();
    let second_ids: HashSet<_> = second.iter().map(|d| d.id().to_string()).collect();
    assert_eq!(first_ids, second_ids);
    for again in &second {
        let original = first.iter().find(|d| d.id() == again.id()).unwrap();
        assert_eq!(again.duplicate_count, 1);
        assert_eq!(again.count, original.count);
    }
}

#[test]
fn test_filters_commute() {
    let classified: Vec<_> = sample_events().into_iter().map(classify_event).collect();
    let namespace = || Box::new(NamespaceFilter::new(["prod"]));
    let severity = || Box::new(SeverityFilter::Only(Severity::Critical));

    let ns_first = FilterChain::new()
        .add_filter(namespace())
        .add_filter(severity())
        .apply(classified.clone());
    let sev_first = FilterChain::new()
        .add_filter(severity())
        .add_filter(namespace())
        .apply(classified);

    assert_eq!(ns_first, sev_first);
    assert_eq!(ns_first.len(), 2);
}

#[tokio::test]
async fn test_repeated_oom_collapses_to_one_critical_entry() {
    let monitor = loaded_monitor(vec![
        oom("a", at(10, 0)),
        oom("b", at(10, 2)),
        oom("c", at(10, 5)),
    ])
    .await;

    let view = monitor.filtered_events().unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].duplicate_count, 3);
    assert_eq!(view[0].first_seen, Some(at(10, 0)));
    assert_eq!(view[0].last_seen, Some(at(10, 5)));
    assert_eq!(view[0].severity(), Severity::Critical);
    assert_eq!(view[0].related_events, vec!["b", "c"]);
}

#[tokio::test]
async fn test_push_while_paused_leaves_set_unchanged() {
    let monitor = loaded_monitor(sample_events()).await;
    let before = monitor.snapshot();

    monitor.pause().await.unwrap();
    let outcome = monitor.push_event(oom("late", at(11, 0))).await.unwrap();

    assert_eq!(outcome, StreamOutcome::Paused);
    assert_eq!(monitor.snapshot().events, before.events);
}

#[tokio::test]
async fn test_hourly_groups() {
    let events = vec![
        RawEvent::new("x", "Pod/a", "pod_killed").at(at(10, 15)),
        RawEvent::new("y", "Pod/b", "pod_killed").at(at(10, 45)),
        RawEvent::new("z", "Pod/c", "pod_killed").at(at(11, 5)),
    ];
    let monitor = loaded_monitor(events).await;

    let period = pulse_core::parse_period("1h").unwrap();
    let groups = monitor.group_by_period(period).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!((groups[0].time, groups[0].count), (at(11, 0), 1));
    assert_eq!((groups[1].time, groups[1].count), (at(10, 0), 2));
    assert!(groups[0].time - groups[1].time == Duration::hours(1));
}

#[tokio::test]
async fn test_grouping_survives_odd_timestamps() {
    let mut events: Vec<RawEvent> = pulse_core::source::decode_records(
        r#"[{"id":"ok","timestamp":"2025-01-01T10:20:00Z"},{"id":"ms","timestamp":1735725600000}]"#,
    )
    .unwrap();
    let far = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
    events.push(RawEvent::new("far", "Pod/x", "pod_killed").at(far));
    let monitor = loaded_monitor(events).await;

    let groups = monitor.group_by_period(Duration::hours(1)).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!((groups[0].time, groups[0].count), (at(10, 0), 2));
}

#[tokio::test]
async fn test_navigation_filter_applies_once() {
    let monitor = loaded_monitor(sample_events()).await;
    let unfiltered = monitor.filtered_events().unwrap();

    let slot = monitor.navigation().clone();
    slot.set(NavigationFilter::new("deployment/web", "prod", "Deployment"));
    let narrowed = monitor.filtered_events().unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].id(), "c");

    assert_eq!(monitor.filtered_events().unwrap(), unfiltered);
}

#[tokio::test]
async fn test_log_errors_without_status_are_hidden() {
    let (monitor, _handle) = EventMonitor::spawn(&PulseConfig::default()).unwrap();
    let errors = vec![
        LogError {
            pod: "api-1".to_string(),
            namespace: "prod".to_string(),
            status_code: 503,
            ..LogError::default()
        },
        LogError {
            pod: "api-2".to_string(),
            namespace: "prod".to_string(),
            status_code: 0,
            ..LogError::default()
        },
        LogError {
            pod: "api-3".to_string(),
            namespace: "dev".to_string(),
            status_code: 404,
            ..LogError::default()
        },
    ];
    let ticket = monitor.begin_fetch().await.unwrap();
    monitor.apply_log_errors(ticket, Ok(errors)).await.unwrap();

    let pods: Vec<_> = monitor.filtered_log_errors().into_iter().map(|e| e.pod).collect();
    assert_eq!(pods, vec!["api-1", "api-3"]);

    monitor
        .set_namespace_filter(NamespaceFilter::new(["prod", "staging"]))
        .await
        .unwrap();
    let pods: Vec<_> = monitor.filtered_log_errors().into_iter().map(|e| e.pod).collect();
    assert_eq!(pods, vec!["api-1"]);
}

#[tokio::test]
async fn test_working_set_never_exceeds_bound() {
    let (monitor, _handle) = EventMonitor::spawn(&PulseConfig::default()).unwrap();
    for i in 0..520 {
        monitor
            .push_event(RawEvent::new(format!("s{}", i), "Pod/api", "pod_killed"))
            .await
            .unwrap();
        assert!(monitor.snapshot().len() <= 500);
    }

    let ticket = monitor.begin_fetch().await.unwrap();
    let batch: Vec<_> = (0..100)
        .map(|i| RawEvent::new(format!("b{}", i), "Pod/api", "pod_killed"))
        .collect();
    monitor.apply_batch(ticket, Ok(batch)).await.unwrap();

    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.len(), 500);
    assert_eq!(snapshot.events[0].id, "s519");
}

#[tokio::test]
async fn test_view_filters_through_monitor() {
    let monitor = loaded_monitor(sample_events()).await;

    monitor
        .set_severity_filter(SeverityFilter::Only(Severity::High))
        .await
        .unwrap();
    let view = monitor.filtered_events().unwrap();
    let ids: Vec<_> = view.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["d"]);

    monitor.set_severity_filter(SeverityFilter::All).await.unwrap();
    monitor.set_type_filter(TypeFilter::from("application")).await.unwrap();
    let view = monitor.filtered_events().unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].id(), "e");
}

#[tokio::test]
async fn test_refresh_failure_keeps_last_known_events() {
    let source = ScriptedSource::new(sample_events(), Vec::new());
    let (monitor, _handle) = EventMonitor::spawn(&PulseConfig::default()).unwrap();
    let settings = RefreshSettings::default();

    let (events, _) = refresh_once(&monitor, &source, &settings).await.unwrap();
    assert!(matches!(events, BatchOutcome::Applied { loaded: 6, .. }));
    let before = monitor.filtered_events().unwrap();

    source.failing.store(true, Ordering::SeqCst);
    let (events, _) = refresh_once(&monitor, &source, &settings).await.unwrap();
    assert_eq!(events, BatchOutcome::Failed);
    assert!(monitor.refresh_error().is_some());
    assert_eq!(monitor.filtered_events().unwrap(), before);

    source.failing.store(false, Ordering::SeqCst);
    refresh_once(&monitor, &source, &settings).await.unwrap();
    assert!(monitor.refresh_error().is_none());
}

#[tokio::test]
async fn test_stream_and_batch_merge() {
    let (monitor, _handle) = EventMonitor::spawn(&PulseConfig::default()).unwrap();
    let frames = vec![
        r#"{"type":"monitored_event","data":{"id":"live-1","resource":"Pod/api","category":"pod_killed"}}"#.to_string(),
        r#"{"type":"heartbeat"}"#.to_string(),
        "garbage".to_string(),
        r#"{"type":"monitored_event","data":{"id":"b1","resource":"Pod/api","category":"pod_killed"}}"#.to_string(),
        r#"{"type":"log_error","data":{"pod":"api","namespace":"prod","status_code":500}}"#.to_string(),
    ];

    let merged = pulse_core::stream::consume(&monitor, stream::iter(frames)).await.unwrap();
    assert_eq!(merged, 3);

    let ticket = monitor.begin_fetch().await.unwrap();
    monitor
        .apply_batch(ticket, Ok(vec![RawEvent::new("b1", "Pod/api", "pod_killed")]))
        .await
        .unwrap();

    let snapshot = monitor.snapshot();
    let ids: Vec<_> = snapshot.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["live-1", "b1"]);
    assert_eq!(snapshot.stream_count(), 1);
    assert_eq!(snapshot.log_errors.len(), 1);
}

#[tokio::test]
async fn test_poller_loads_batches() {
    let config = PulseConfig::default();
    let (monitor, _handle) = EventMonitor::spawn(&config).unwrap();
    let mut updates = monitor.subscribe();
    let source = std::sync::Arc::new(ScriptedSource::new(sample_events(), Vec::new()));

    let poller = pulse_core::spawn_poller(
        monitor.clone(),
        source,
        RefreshSettings::from_config(&config),
        std::time::Duration::from_millis(20),
    );

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while updates.borrow_and_update().is_empty() {
            updates.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(monitor.snapshot().len(), 6);
    poller.abort();
}
