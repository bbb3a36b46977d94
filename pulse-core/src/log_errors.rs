//! HTTP error records extracted from application logs.
//!
//! This feed runs beside the event pipeline: records are never
//! deduplicated, only narrowed to actionable status codes and the selected
//! namespaces.

use crate::filter::NamespaceFilter;
use crate::model::{lenient_string, lenient_timestamp, parse_timestamp, RawEvent, Severity};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

static LEADING_TIMESTAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)\s+")
        .expect("Failed to compile leading timestamp regex")
});

static METHOD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\b")
        .expect("Failed to compile method regex")
});

static METHOD_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\s+(\S+)")
        .expect("Failed to compile method/path regex")
});

/// Status code shapes, most specific first.
static HTTP_STATUS_PATTERNS: LazyLock<Vec<(StatusPattern, Regex)>> = LazyLock::new(|| {
    [
        (
            StatusPattern::RequestLine,
            r"(?i)\b(GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\s+(\S+)\s+(\d{3})\b",
        ),
        (StatusPattern::Explicit, r"(?i)HTTP/[0-9.]+?\s+(\d{3})\b"),
        (StatusPattern::Explicit, r"(?i)(?:status|status_code|statusCode)[=:]\s*(\d{3})\b"),
        (StatusPattern::Explicit, r#"(?i)"status(?:Code)?"\s*:\s*(\d{3})\b"#),
        (StatusPattern::Explicit, r"(?i)returned\s+(?:status\s+)?(\d{3})\b"),
        (
            StatusPattern::Explicit,
            r"(?i)\b(\d{3})\s+(?:Internal Server Error|Bad Gateway|Service Unavailable|Gateway Timeout|Not Found|Forbidden|Unauthorized|Bad Request)",
        ),
        (
            StatusPattern::Contextual,
            r"(?i)(?:HTTP|status|code|response|error|failed|returned).*?\b(4\d{2}|5\d{2})\b",
        ),
    ]
    .into_iter()
    .map(|(kind, pattern)| {
        (
            kind,
            Regex::new(pattern).expect("Failed to compile HTTP status regex"),
        )
    })
    .collect()
});

/// Registered 4xx and 5xx codes; anything else in that range is most likely
/// a line number or an id that happened to fit the pattern.
const REGISTERED_ERROR_CODES: &[i32] = &[
    400, 401, 402, 403, 404, 405, 406, 407, 408, 409, 410, 411, 412, 413, 414, 415, 416, 417,
    418, 421, 422, 423, 424, 425, 426, 428, 429, 431, 451, 500, 501, 502, 503, 504, 505, 506,
    507, 508, 510, 511,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusPattern {
    /// `METHOD /path NNN`, carries method and path itself.
    RequestLine,
    /// Status code stated outright; any code stops the search.
    Explicit,
    /// Bare 4xx/5xx somewhere after an HTTP-ish keyword.
    Contextual,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogError {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub namespace: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pod: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub container: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub method: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub path: String,
    #[serde(default, deserialize_with = "lenient_status_code")]
    pub status_code: i32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error_type: String,
}

/// Numeric or numeric-string codes; anything else is 0, which the view drops.
fn lenient_status_code<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|c| i32::try_from(c).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or_default())
}

impl LogError {
    /// 500/502/503 responses and failed POSTs.
    pub fn is_critical(&self) -> bool {
        matches!(self.status_code, 500 | 502 | 503) || self.method.eq_ignore_ascii_case("POST")
    }

    pub fn severity(&self) -> Severity {
        if self.error_type == "http_500" || self.error_type == "http_502" {
            Severity::Critical
        } else if self.status_code >= 500 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    /// Promote to an application event so HTTP failures show up beside
    /// infrastructure events.
    pub fn to_event(&self) -> RawEvent {
        let unix = self.timestamp.map(|ts| ts.timestamp()).unwrap_or_default();
        let mut details = HashMap::new();
        details.insert("method".to_string(), serde_json::json!(self.method));
        details.insert("path".to_string(), serde_json::json!(self.path));
        details.insert("status_code".to_string(), serde_json::json!(self.status_code));
        details.insert("container".to_string(), serde_json::json!(self.container));
        details.insert("message".to_string(), serde_json::json!(self.message));

        RawEvent {
            id: format!("log-{}-{}-{}", self.pod, self.container, unix),
            timestamp: self.timestamp,
            namespace: Some(self.namespace.clone()).filter(|ns| !ns.is_empty()),
            resource: format!("Pod/{}", self.pod),
            kind: "Pod".to_string(),
            event_type: "application".to_string(),
            category: self.error_type.clone(),
            title: format!("HTTP {} error in {}", self.status_code, self.pod),
            description: format!("{} {} returned {}", self.method, self.path, self.status_code),
            source: "log_parser".to_string(),
            count: 1,
            severity: self.severity(),
            group_id: format!("{}-{}-Pod-{}", self.error_type, self.namespace, self.pod),
            details,
        }
    }
}

/// Records with a status code, in arrival order, limited to the selected
/// namespaces when any are selected.
pub fn filter_log_errors(errors: &[LogError], namespaces: &NamespaceFilter) -> Vec<LogError> {
    errors
        .iter()
        .filter(|e| e.status_code > 0 && namespaces.allows(&e.namespace))
        .cloned()
        .collect()
}

pub fn extract_log_errors<'a, I>(lines: I, pod: &str, namespace: &str, container: &str) -> Vec<LogError>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| extract_log_error(line, pod, namespace, container))
        .collect()
}

/// Parse one log line for an HTTP error. Lines without a registered 4xx/5xx
/// status yield `None`.
pub fn extract_log_error(line: &str, pod: &str, namespace: &str, container: &str) -> Option<LogError> {
    let (timestamp, body) = split_leading_timestamp(line);

    let (status_code, method, path) = find_status(body)?;
    if !(400..=599).contains(&status_code) || !REGISTERED_ERROR_CODES.contains(&status_code) {
        return None;
    }

    let error_type = match status_code {
        500 => "http_500",
        502 => "http_502",
        503 => "http_503",
        _ if method == "POST" => "failed_post",
        _ => "http_error",
    };

    Some(LogError {
        timestamp: Some(timestamp.unwrap_or_else(Utc::now)),
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        container: container.to_string(),
        method,
        path,
        status_code,
        message: body.to_string(),
        error_type: error_type.to_string(),
    })
}

fn split_leading_timestamp(line: &str) -> (Option<DateTime<Utc>>, &str) {
    if let Some(caps) = LEADING_TIMESTAMP_REGEX.captures(line) {
        if let Some(ts) = caps.get(1).and_then(|m| parse_timestamp(m.as_str())) {
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            return (Some(ts), &line[end..]);
        }
    }
    (None, line)
}

fn find_status(line: &str) -> Option<(i32, String, String)> {
    for (kind, pattern) in HTTP_STATUS_PATTERNS.iter() {
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        match kind {
            StatusPattern::RequestLine => {
                let code = caps.get(3)?.as_str().parse().ok()?;
                let method = caps.get(1)?.as_str().to_uppercase();
                let path = caps.get(2)?.as_str().to_string();
                return Some((code, method, path));
            }
            StatusPattern::Explicit => {
                let code = caps.get(1)?.as_str().parse().ok()?;
                let (method, path) = method_and_path(line);
                return Some((code, method, path));
            }
            StatusPattern::Contextual => {
                let code: i32 = caps.get(1)?.as_str().parse().ok()?;
                if code >= 400 {
                    let (method, path) = method_and_path(line);
                    return Some((code, method, path));
                }
            }
        }
    }
    None
}

fn method_and_path(line: &str) -> (String, String) {
    let method = METHOD_REGEX
        .find(line)
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let path = METHOD_PATH_REGEX
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    (method, path)
}
