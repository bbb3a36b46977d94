//! Batch fetch collaborators and the periodic refresh task.

use crate::error::{FetchError, Result};
use crate::filter::{SeverityFilter, TypeFilter, ViewFilters};
use crate::log_errors::LogError;
use crate::model::{RawEvent, Severity};
use crate::monitor::EventMonitor;
use crate::store::BatchOutcome;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub limit: usize,
}

impl EventQuery {
    /// A query narrowed by whatever the current view filters pin down.
    /// Only a single selected namespace is passed through.
    pub fn from_filters(filters: &ViewFilters, limit: usize) -> Self {
        Self {
            namespace: filters.namespaces.single().map(str::to_string),
            severity: match filters.severity {
                SeverityFilter::All => None,
                SeverityFilter::Only(severity) => Some(severity),
            },
            event_type: match &filters.event_type {
                TypeFilter::All => None,
                TypeFilter::Only(event_type) => Some(event_type.clone()),
            },
            limit,
        }
    }

    /// Whether a source-side record satisfies this query. Severity here is
    /// the source-reported one; classification happens later.
    pub fn admits(&self, event: &RawEvent) -> bool {
        self.namespace
            .as_deref()
            .map_or(true, |ns| event.namespace_or_empty() == ns)
            && self.severity.map_or(true, |s| event.severity == s)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogErrorQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub critical_only: bool,
    pub limit: usize,
}

impl LogErrorQuery {
    pub fn admits(&self, error: &LogError) -> bool {
        self.namespace.as_deref().map_or(true, |ns| error.namespace == ns)
            && (!self.critical_only || error.is_critical())
    }
}

/// Where batch refreshes come from.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self, query: &EventQuery) -> std::result::Result<Vec<RawEvent>, FetchError>;

    async fn fetch_log_errors(&self, query: &LogErrorQuery) -> std::result::Result<Vec<LogError>, FetchError>;

    fn name(&self) -> &str {
        "source"
    }
}

/// Reads events and log errors from JSON or JSONL files on every fetch.
#[derive(Debug, Clone)]
pub struct FileSource {
    events_path: PathBuf,
    log_errors_path: Option<PathBuf>,
}

impl FileSource {
    pub fn new(events_path: impl Into<PathBuf>) -> Self {
        Self {
            events_path: events_path.into(),
            log_errors_path: None,
        }
    }

    pub fn with_log_errors(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_errors_path = Some(path.into());
        self
    }
}

async fn read_records<T: DeserializeOwned>(path: &Path) -> std::result::Result<Vec<T>, FetchError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FetchError::Transport(format!("{}: {}", path.display(), e)))?;
    decode_records(&content)
}

/// A JSON array, or one JSON object per line. Undecodable lines are
/// skipped; an undecodable array fails as a whole.
pub fn decode_records<T: DeserializeOwned>(content: &str) -> std::result::Result<Vec<T>, FetchError> {
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(content)?);
    }

    let mut records = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping line {}: {}", n + 1, e),
        }
    }
    Ok(records)
}

#[async_trait]
impl EventSource for FileSource {
    async fn fetch_events(&self, query: &EventQuery) -> std::result::Result<Vec<RawEvent>, FetchError> {
        let events: Vec<RawEvent> = read_records(&self.events_path).await?;
        Ok(events
            .into_iter()
            .filter(|e| query.admits(e))
            .take(query.limit)
            .collect())
    }

    async fn fetch_log_errors(&self, query: &LogErrorQuery) -> std::result::Result<Vec<LogError>, FetchError> {
        let Some(path) = &self.log_errors_path else {
            return Ok(Vec::new());
        };
        let errors: Vec<LogError> = read_records(path).await?;
        Ok(errors
            .into_iter()
            .filter(|e| query.admits(e))
            .take(query.limit)
            .collect())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub event_limit: usize,
    pub log_error_limit: usize,
    pub critical_only: bool,
    pub timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            event_limit: 500,
            log_error_limit: 200,
            critical_only: false,
            timeout: FETCH_TIMEOUT,
        }
    }
}

impl RefreshSettings {
    pub fn from_config(config: &crate::config::PulseConfig) -> Self {
        Self {
            event_limit: config.refresh.fetch_limit,
            log_error_limit: config.log_errors.fetch_limit,
            critical_only: config.log_errors.critical_only,
            timeout: FETCH_TIMEOUT,
        }
    }
}

async fn with_timeout<T, F>(timeout: Duration, fetch: F) -> std::result::Result<T, FetchError>
where
    F: std::future::Future<Output = std::result::Result<T, FetchError>>,
{
    tokio::time::timeout(timeout, fetch)
        .await
        .unwrap_or(Err(FetchError::Timeout(timeout.as_secs())))
}

/// One refresh round: events, then log errors, both stamped when issued.
pub async fn refresh_once(
    monitor: &EventMonitor,
    source: &dyn EventSource,
    settings: &RefreshSettings,
) -> Result<(BatchOutcome, BatchOutcome)> {
    let filters = monitor.snapshot().filters.clone();

    let ticket = monitor.begin_fetch().await?;
    let query = EventQuery::from_filters(&filters, settings.event_limit);
    debug!(source = source.name(), ?query, "Fetching events");
    let result = with_timeout(settings.timeout, source.fetch_events(&query)).await;
    let events = monitor.apply_batch(ticket, result).await?;

    let ticket = monitor.begin_fetch().await?;
    let query = LogErrorQuery {
        namespace: filters.namespaces.single().map(str::to_string),
        critical_only: settings.critical_only,
        limit: settings.log_error_limit,
    };
    let result = with_timeout(settings.timeout, source.fetch_log_errors(&query)).await;
    let errors = monitor.apply_log_errors(ticket, result).await?;

    Ok((events, errors))
}

/// Refresh on a fixed interval until the monitor shuts down.
pub fn spawn_poller(
    monitor: EventMonitor,
    source: Arc<dyn EventSource>,
    settings: RefreshSettings,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Polling {} every {:?}", source.name(), interval);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match refresh_once(&monitor, source.as_ref(), &settings).await {
                Ok((BatchOutcome::Failed, _)) | Ok((_, BatchOutcome::Failed)) => {
                    warn!("Refresh from {} failed, keeping last known events", source.name());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Poller stopped: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::NamespaceFilter;

    #[test]
    fn test_query_from_filters() {
        let filters = ViewFilters {
            severity: SeverityFilter::Only(Severity::High),
            event_type: TypeFilter::from("application"),
            namespaces: NamespaceFilter::new(["prod"]),
        };
        let query = EventQuery::from_filters(&filters, 100);
        assert_eq!(query.namespace.as_deref(), Some("prod"));
        assert_eq!(query.severity, Some(Severity::High));
        assert_eq!(query.event_type.as_deref(), Some("application"));

        let filters = ViewFilters {
            namespaces: NamespaceFilter::new(["prod", "staging"]),
            ..ViewFilters::default()
        };
        let query = EventQuery::from_filters(&filters, 100);
        assert_eq!(query, EventQuery { limit: 100, ..EventQuery::default() });
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        tokio::fs::write(
            &path,
            r#"[
                {"id": "1", "namespace": "prod", "type": "infrastructure"},
                {"id": "2", "namespace": "dev", "type": "infrastructure"},
                {"id": "3", "namespace": "prod", "type": "application"}
            ]"#,
        )
        .await
        .unwrap();

        let source = FileSource::new(&path);
        let query = EventQuery {
            namespace: Some("prod".to_string()),
            limit: 10,
            ..EventQuery::default()
        };
        let events = source.fetch_events(&query).await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        assert!(source.fetch_log_errors(&LogErrorQuery::default()).await.unwrap().is_empty());
    }

    #[test]
    fn test_decode_jsonl_skips_bad_lines() {
        let content = "{\"id\": \"1\"}\n\nnot json\n{\"id\": \"2\", \"count\": 3}\n";
        let events: Vec<RawEvent> = decode_records(content).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].count, 3);

        assert!(decode_records::<RawEvent>("[{\"id\": 1}").is_err());
    }

    #[test]
    fn test_decode_array_with_null_fields() {
        let content = r#"[{"id":"a","resource":"Pod/x","title":"ok"},{"id":"b","resource":"Pod/y","title":null}]"#;
        let events: Vec<RawEvent> = decode_records(content).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].title, "");
    }

    #[tokio::test]
    async fn test_missing_file_is_transport_error() {
        let source = FileSource::new("/nonexistent/pulse/events.json");
        let err = source
            .fetch_events(&EventQuery { limit: 1, ..EventQuery::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
