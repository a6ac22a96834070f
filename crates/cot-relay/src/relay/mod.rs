//! Broker-to-room relay: the consumer that forwards CoT events and the room
//! hub it emits into.

pub mod consumer;
pub mod hub;

#[cfg(test)]
pub(crate) mod testing;

pub use consumer::{ChannelHandler, RelayConsumer};
pub use hub::RoomHub;
