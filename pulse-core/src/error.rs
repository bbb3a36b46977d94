use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Deduplication window must be positive, got {0} minutes")]
    InvalidWindow(u32),
    #[error("Invalid bucket period: {0}")]
    InvalidPeriod(String),
    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Event monitor is no longer running")]
    MonitorClosed,
}

/// Failures of the external batch fetch and stream collaborators.
///
/// These never escape the monitor as faults; they are recorded on the
/// published snapshot and the last-known working set keeps being served.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Malformed response: {0}")]
    Decode(String),
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}
