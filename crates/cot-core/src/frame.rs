//! JSON frames exchanged with real-time subscribers.

use serde::{Deserialize, Serialize};

/// One emission into a broadcast room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFrame {
    /// Event name (always `cot` for relayed payloads).
    pub event: String,
    /// Payload text, passed through untouched.
    pub data: String,
}

impl BroadcastFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// Messages a subscriber may send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat; answered with [`ServerMessage::Pong`].
    Ping,
    /// Free-form message, logged by the relay.
    Message {
        #[serde(default)]
        data: String,
    },
}

impl ClientMessage {
    /// Parse client text. Anything that is not a known JSON message is
    /// treated as a free-form message.
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| ClientMessage::Message {
            data: text.to_string(),
        })
    }
}

/// Control messages sent by the relay to a subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the WebSocket upgrade.
    Connected { room: String },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_frame_wire_shape() {
        let frame = BroadcastFrame::new("cot", r#"{"event":"ping"}"#);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"event":"cot","data":"{\"event\":\"ping\"}"}"#);
    }

    #[test]
    fn client_ping_parsing() {
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#), ClientMessage::Ping);
    }

    #[test]
    fn unknown_client_text_is_a_message() {
        assert_eq!(
            ClientMessage::parse("hello"),
            ClientMessage::Message {
                data: "hello".into()
            }
        );
    }

    #[test]
    fn server_connected_serialization() {
        let json = serde_json::to_string(&ServerMessage::Connected {
            room: "/debugger".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"connected","room":"/debugger"}"#);
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
    }
}
