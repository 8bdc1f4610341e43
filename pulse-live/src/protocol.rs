//! JSON wire protocol for the simulation push channel.
//!
//! One event per WebSocket text frame, internally tagged by `"type"`:
//!
//! ```text
//! {"type":"new-message","message":{...},"chatTitle":"Bug Report #12"}
//! {"type":"simulation-started"}
//! {"type":"simulation-stopped"}
//! {"type":"status","running":false,"clientCount":1,"port":8080}
//! ```
//!
//! No batching, compression or sequence numbers. Liveness is carried by
//! WebSocket ping/pong frames, not by this payload.

use pulse_core::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events pushed from the simulation server to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SimulationEvent {
    /// A message was persisted and should appear in the chat list
    NewMessage { message: Message, chat_title: String },
    SimulationStarted,
    SimulationStopped,
    /// Sent once to each connection right after it registers
    Status {
        running: bool,
        client_count: usize,
        port: u16,
    },
}

impl SimulationEvent {
    pub fn status(status: &SimulationStatus) -> Self {
        Self::Status {
            running: status.running,
            client_count: status.client_count,
            port: status.port,
        }
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new-message",
            Self::SimulationStarted => "simulation-started",
            Self::SimulationStopped => "simulation-stopped",
            Self::Status { .. } => "status",
        }
    }

    /// Serialize to a JSON text frame payload.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame payload.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Frames a client sends upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Application-level keepalive; the server accepts and ignores it
    Ping,
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Snapshot returned by the control surface and mirrored in `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    pub running: bool,
    pub client_count: usize,
    pub port: u16,
}

/// Protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            id: 11,
            chat_id: 3,
            ts: 1_700_000_000_123,
            sender: "Grace".to_string(),
            body: "The build is passing now after the patch.".to_string(),
        }
    }

    #[test]
    fn test_new_message_wire_shape() {
        let event = SimulationEvent::NewMessage {
            message: sample_message(),
            chat_title: "Bug Report #7".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "new-message");
        assert_eq!(json["chatTitle"], "Bug Report #7");
        assert_eq!(json["message"]["chatId"], 3);
        assert_eq!(SimulationEvent::decode(&event.encode().unwrap()).unwrap(), event);
    }

    #[test]
    fn test_unit_variants_are_bare_tags() {
        assert_eq!(
            SimulationEvent::SimulationStarted.encode().unwrap(),
            r#"{"type":"simulation-started"}"#
        );
        assert_eq!(
            SimulationEvent::decode(r#"{"type":"simulation-stopped"}"#).unwrap(),
            SimulationEvent::SimulationStopped
        );
    }

    #[test]
    fn test_status_wire_shape() {
        let raw = r#"{"type":"status","running":false,"clientCount":1,"port":8080}"#;
        let event = SimulationEvent::decode(raw).unwrap();
        assert_eq!(
            event,
            SimulationEvent::Status {
                running: false,
                client_count: 1,
                port: 8080
            }
        );
        assert_eq!(event.kind(), "status");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(SimulationEvent::decode("not json").is_err());
        assert!(SimulationEvent::decode(r#"{"type":"unknown"}"#).is_err());
        assert!(SimulationEvent::decode(r#"{"type":"new-message"}"#).is_err());
        assert!(SimulationEvent::decode(r#"{"running":true}"#).is_err());
    }

    #[test]
    fn test_error_variants_are_codec_failures() {
        // Exhaustive: connection state never surfaces as a protocol error.
        for err in [
            SimulationEvent::decode("{").unwrap_err(),
            ClientFrame::decode(r#"{"type":"pong"}"#).unwrap_err(),
        ] {
            match err {
                ProtocolError::Deserialization(detail) => assert!(!detail.is_empty()),
                ProtocolError::Serialization(detail) => panic!("Unexpected serialization error: {detail}"),
            }
        }
    }

    #[test]
    fn test_client_ping_frame() {
        assert_eq!(ClientFrame::Ping.encode().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(ClientFrame::decode(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
    }

    #[test]
    fn test_status_from_snapshot() {
        let snapshot = SimulationStatus {
            running: true,
            client_count: 4,
            port: 9000,
        };
        match SimulationEvent::status(&snapshot) {
            SimulationEvent::Status { running, client_count, port } => {
                assert!(running);
                assert_eq!(client_count, 4);
                assert_eq!(port, 9000);
            }
            other => panic!("Expected status event, got {other:?}"),
        }
    }
}
