//! Messages handed to the relay by the broker.
//!
//! A [`Delivery`] is owned and not `Clone`: passing one to the consumer moves
//! it, so a single broker delivery can be relayed at most once.

use crate::error::{RelayError, RelayResult};

/// Optional AMQP basic properties, traced alongside each relayed message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryProperties {
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
}

/// One message delivered from the bound queue.
#[derive(Debug)]
pub struct Delivery {
    /// Broker-assigned tag, unique per channel.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key used at publish time (empty on a fanout).
    pub routing_key: String,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    pub properties: DeliveryProperties,
    payload: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, payload: Vec<u8>) -> Self {
        Self {
            delivery_tag,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            properties: DeliveryProperties::default(),
            payload,
        }
    }

    /// Set the exchange and routing key the message arrived through.
    pub fn with_route(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn with_properties(mut self, properties: DeliveryProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload decoded as UTF-8 text.
    pub fn text(&self) -> RelayResult<&str> {
        decode_payload(&self.payload)
    }
}

/// Decode a payload as strict UTF-8.
pub fn decode_payload(payload: &[u8]) -> RelayResult<&str> {
    std::str::from_utf8(payload).map_err(|e| {
        RelayError::Decode(format!(
            "invalid UTF-8 at byte {} of {}",
            e.valid_up_to(),
            payload.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_text() {
        let d = Delivery::new(1, br#"{"event":"ping"}"#.to_vec());
        assert_eq!(d.text().unwrap(), r#"{"event":"ping"}"#);
    }

    #[test]
    fn empty_payload_is_empty_text() {
        assert_eq!(decode_payload(b"").unwrap(), "");
    }

    #[test]
    fn invalid_utf8_reports_offset() {
        let err = decode_payload(&[b'o', b'k', 0xff, 0xfe]).unwrap_err();
        match err {
            RelayError::Decode(msg) => assert!(msg.contains("byte 2 of 4"), "got: {msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_multibyte_sequence_is_rejected() {
        // First two bytes of a three-byte sequence.
        assert!(decode_payload(&[0xe2, 0x82]).is_err());
    }

    #[test]
    fn builder_sets_metadata() {
        let d = Delivery::new(7, b"x".to_vec())
            .with_route("cot_controller", "")
            .with_redelivered(true)
            .with_properties(DeliveryProperties {
                content_type: Some("application/xml".into()),
                ..Default::default()
            });
        assert_eq!(d.delivery_tag, 7);
        assert_eq!(d.exchange, "cot_controller");
        assert!(d.redelivered);
        assert_eq!(d.properties.content_type.as_deref(), Some("application/xml"));
        assert_eq!(d.payload(), b"x");
    }
}
