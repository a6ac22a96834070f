//! Collaborator traits the relay is written against.
//!
//! The broker side is a [`BrokerChannel`]: a live AMQP channel handed to the
//! relay each time the connection supervisor (re)opens one. The subscriber
//! side is a [`Broadcast`]: a room-scoped publish surface.

use crate::error::RelayResult;
use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future, used where trait methods must be awaited from
/// spawned tasks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A logical broker channel supporting bind and consume.
pub trait BrokerChannel: Send + Sync {
    /// Bind `queue` to `exchange`. Re-binding an existing binding is a no-op
    /// on the broker.
    fn queue_bind<'a>(&'a self, queue: &'a str, exchange: &'a str) -> BoxFuture<'a, RelayResult<()>>;

    /// Register a consumer on `queue`. Returns the tag the broker accepted.
    fn basic_consume<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
        auto_ack: bool,
    ) -> BoxFuture<'a, RelayResult<String>>;

    /// Cancel a consumer registered on this channel.
    fn basic_cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, RelayResult<()>>;

    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;
}

/// A room-scoped, fire-and-forget broadcast surface.
pub trait Broadcast: Send + Sync {
    /// Deliver `payload` under `event` to every subscriber currently in
    /// `room`. Never blocks; a room without subscribers is not an error.
    fn emit(&self, event: &str, payload: &str, room: &str) -> RelayResult<()>;
}
