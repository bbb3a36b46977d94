use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::PipelineError;

/// Impact tier of an event, ordered `Info < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(PipelineError::UnknownSeverity(s.to_string())),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An infrastructure event as delivered by a batch fetch or the live stream.
///
/// Deserialization is lenient: a record with a missing or garbled field is
/// defaulted rather than rejected, so one bad record cannot blank a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default = "generate_event_id", deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_namespace")]
    pub namespace: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub resource: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub event_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: String,
    #[serde(default = "default_count", deserialize_with = "lenient_count")]
    pub count: u32,
    #[serde(default, deserialize_with = "lenient_severity")]
    pub severity: Severity,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "String::is_empty"
    )]
    pub group_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl RawEvent {
    pub fn new(id: impl Into<String>, resource: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            namespace: None,
            resource: resource.into(),
            kind: String::new(),
            event_type: String::new(),
            category: category.into(),
            title: String::new(),
            description: String::new(),
            source: String::new(),
            count: 1,
            severity: Severity::Info,
            group_id: String::new(),
            details: HashMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_text(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        self.title = title.into();
        self.description = description.into();
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Namespace as matched by filters; cluster-scoped events match `""`.
    pub fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }

    /// Object kind, falling back to the `Kind/name` prefix of `resource`.
    pub fn kind(&self) -> &str {
        if !self.kind.is_empty() {
            return &self.kind;
        }
        match self.resource.split_once('/') {
            Some((kind, _)) => kind,
            None => "",
        }
    }

    /// Category used for grouping, falling back to the source-provided type.
    pub fn category_or_type(&self) -> &str {
        if self.category.is_empty() {
            &self.event_type
        } else {
            &self.category
        }
    }
}

/// A raw event whose `severity` has been run through escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    #[serde(flatten)]
    pub event: RawEvent,
    /// Severity as assigned by the origin, before escalation.
    pub reported_severity: Severity,
}

impl ClassifiedEvent {
    pub fn new(mut event: RawEvent, severity: Severity) -> Self {
        let reported_severity = event.severity;
        event.severity = severity.max(reported_severity);
        Self {
            event,
            reported_severity,
        }
    }

    pub fn severity(&self) -> Severity {
        self.event.severity
    }

    pub fn escalated(&self) -> bool {
        self.event.severity > self.reported_severity
    }
}

/// A deduplication group collapsed onto its earliest member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicatedEvent {
    pub event: ClassifiedEvent,
    pub duplicate_count: usize,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub related_events: Vec<String>,
    /// Sum of the members' origin occurrence counts.
    pub count: u64,
    pub window_minutes: u32,
}

impl DeduplicatedEvent {
    pub fn id(&self) -> &str {
        &self.event.event.id
    }

    pub fn severity(&self) -> Severity {
        self.event.severity()
    }

    /// The representative as a standalone event carrying the group's total
    /// occurrence count, suitable for feeding back through the pipeline.
    pub fn as_singleton(&self) -> ClassifiedEvent {
        let mut single = self.event.clone();
        single.event.count = u32::try_from(self.count).unwrap_or(u32::MAX);
        single
    }
}

/// Events sharing one fixed-width time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGroup {
    pub time: DateTime<Utc>,
    pub count: usize,
    pub events: Vec<ClassifiedEvent>,
}

/// Ascending by time with unknown timestamps after every known one.
pub fn cmp_oldest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Descending by time with unknown timestamps after every known one.
pub fn cmp_newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub(crate) fn generate_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_count() -> u32 {
    1
}

/// Parses the timestamp shapes seen in event payloads. Go's zero time
/// (year 1) counts as unknown.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc())
        })?;
    if parsed.timestamp() <= ZERO_TIME_CUTOFF {
        return None;
    }
    representable(parsed)
}

// 0001-01-01T00:00:00Z plus slack for timezone offsets.
const ZERO_TIME_CUTOFF: i64 = -62_135_510_400;

// Epoch numbers above this are milliseconds (as seconds it would be past 5000 AD).
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Only instants that fit in i64 nanoseconds (1677 to 2262) can be bucketed.
fn representable(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    ts.timestamp_nanos_opt().map(|_| ts)
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    let ts = if value > EPOCH_MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    };
    ts.and_then(representable)
}

pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => parse_timestamp(&s),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .filter(|value| *value > 0)
            .and_then(from_epoch),
        _ => None,
    })
}

/// Strings stay strings, numbers and booleans are rendered, anything else
/// (null, arrays, objects) becomes empty.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let id = lenient_string(deserializer)?;
    Ok(if id.is_empty() { generate_event_id() } else { id })
}

fn lenient_namespace<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(ns)) if !ns.is_empty() => Some(ns),
        _ => None,
    })
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| v.as_i64())
        .filter(|count| *count >= 1)
        .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
        .unwrap_or(1))
}

fn lenient_severity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or_default(),
        _ => Severity::Info,
    })
}
