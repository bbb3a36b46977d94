//! Live stream messages and the task that feeds them into the monitor.

use crate::error::{PipelineError, Result};
use crate::log_errors::LogError;
use crate::model::RawEvent;
use crate::monitor::EventMonitor;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// One decoded message from the live event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    MonitoredEvent(RawEvent),
    LogError(LogError),
    Heartbeat,
    /// Any other message type; carried by the stream but not ours to handle.
    Other(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl StreamMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let message = match envelope.message_type.as_str() {
            "monitored_event" => StreamMessage::MonitoredEvent(serde_json::from_value(envelope.data)?),
            "log_error" => StreamMessage::LogError(serde_json::from_value(envelope.data)?),
            "heartbeat" => StreamMessage::Heartbeat,
            _ => StreamMessage::Other(envelope.message_type),
        };
        Ok(message)
    }

    pub fn to_json(&self) -> Result<String> {
        let (message_type, data) = match self {
            StreamMessage::MonitoredEvent(event) => ("monitored_event".to_string(), serde_json::to_value(event)?),
            StreamMessage::LogError(error) => ("log_error".to_string(), serde_json::to_value(error)?),
            StreamMessage::Heartbeat => ("heartbeat".to_string(), serde_json::Value::Null),
            StreamMessage::Other(kind) => (kind.clone(), serde_json::Value::Null),
        };
        Ok(serde_json::to_string(&Envelope { message_type, data })?)
    }
}

/// Consume text frames from `stream` until it ends or the monitor stops.
///
/// Undecodable frames are logged and skipped; they never end the stream.
pub fn spawn_stream_consumer<S>(monitor: EventMonitor, stream: S) -> JoinHandle<()>
where
    S: Stream<Item = String> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = consume(&monitor, stream).await {
            debug!("Stream consumer stopped: {}", e);
        }
    })
}

/// Drive `stream` into `monitor`, returning how many frames were merged.
pub async fn consume<S>(monitor: &EventMonitor, mut stream: S) -> Result<usize>
where
    S: Stream<Item = String> + Unpin,
{
    info!("Live stream connected");
    let mut merged = 0usize;

    while let Some(frame) = stream.next().await {
        match StreamMessage::parse(&frame) {
            Ok(StreamMessage::MonitoredEvent(event)) => {
                monitor.push_event(event).await?;
                merged += 1;
            }
            Ok(StreamMessage::LogError(error)) => {
                monitor.push_log_error(error).await?;
                merged += 1;
            }
            Ok(StreamMessage::Heartbeat) => trace!("Stream heartbeat"),
            Ok(StreamMessage::Other(kind)) => debug!("Ignoring stream message type: {}", kind),
            Err(PipelineError::Decode(e)) => warn!("Failed to decode stream message: {}", e),
            Err(e) => return Err(e),
        }
    }

    info!(merged, "Live stream ended");
    Ok(merged)
}
