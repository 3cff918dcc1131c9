//! Control channel messages between the supervisor and its worker.
//! Newline-delimited JSON, `{"type": ..., "body": ...}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::application::errors::SupervisorError;
use crate::domain::entities::ChannelId;

/// Environment variable carrying the supervisor's control address
pub const CONTROL_ADDR_ENV: &str = "PLUGBOT_CONTROL_ADDR";

/// Worker to supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum ControlMessage {
    /// The worker is up; carries its restart preference
    Start(StartBody),
    /// Payload to hand to the next worker that starts
    Queue(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub auto_restart: bool,
}

/// Supervisor to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum DownstreamMessage {
    /// Replay of the buffered `queue` payload
    Send(serde_json::Value),
    /// Interrupt received by the supervisor
    Shutdown,
}

/// Message the worker queues before exiting to have it delivered after restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPayload {
    pub bot_id: String,
    pub channel: ChannelId,
    pub content: String,
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, SupervisorError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| SupervisorError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, SupervisorError> {
    serde_json::from_str(line.trim()).map_err(|e| SupervisorError::Protocol(format!("{}: {}", e, line.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let start = encode(&ControlMessage::Start(StartBody { auto_restart: true })).unwrap();
        assert_eq!(start, "{\"type\":\"start\",\"body\":{\"autoRestart\":true}}\n");

        let queued: ControlMessage = decode(r#"{"type":"queue","body":{"content":"back"}}"#).unwrap();
        assert_eq!(queued, ControlMessage::Queue(json!({"content": "back"})));

        let shutdown = encode(&DownstreamMessage::Shutdown).unwrap();
        assert_eq!(shutdown.trim(), r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = decode::<ControlMessage>(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(matches!(err, SupervisorError::Protocol(_)));
    }

    #[test]
    fn test_outbound_payload_channel_is_string() {
        let payload = OutboundPayload {
            bot_id: "10001".into(),
            channel: ChannelId::group("42"),
            content: "restarted".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["channel"], "group:42");
        assert_eq!(value["botId"], "10001");
    }
}
