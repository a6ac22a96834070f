//! cot-core: Shared library for the CoT relay.
//!
//! Provides the broker/broadcast topology names, the delivery and broadcast
//! frame types, payload decoding, and the collaborator traits the relay is
//! written against (broker channel and broadcast room).

pub mod delivery;
pub mod error;
pub mod frame;
pub mod topology;
pub mod transport;

// Re-export commonly used items at crate root.
pub use delivery::{decode_payload, Delivery, DeliveryProperties};
pub use error::{RelayError, RelayResult};
pub use frame::{BroadcastFrame, ClientMessage, ServerMessage};
pub use topology::{Topology, CONSUMER_TAG, EVENT, EXCHANGE, QUEUE, ROOM};
pub use transport::{Broadcast, BoxFuture, BrokerChannel};
