//! Broker and broadcast names the relay binds to.
//!
//! The exchange is a fanout: every queue bound to it receives every message
//! published by the CoT controller.

/// Fanout exchange carrying CoT events.
pub const EXCHANGE: &str = "cot_controller";

/// Queue bound to [`EXCHANGE`]; shares its name.
pub const QUEUE: &str = "cot_controller";

/// Consumer tag identifying this relay on the queue.
pub const CONSUMER_TAG: &str = "debugger_plugin";

/// Broadcast room (namespace) subscribers join.
pub const ROOM: &str = "/debugger";

/// Event name every relayed payload is emitted under.
pub const EVENT: &str = "cot";

/// The full set of names used by one relay instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub consumer_tag: String,
    pub room: String,
    pub event: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: EXCHANGE.to_string(),
            queue: QUEUE.to_string(),
            consumer_tag: CONSUMER_TAG.to_string(),
            room: ROOM.to_string(),
            event: EVENT.to_string(),
        }
    }
}
