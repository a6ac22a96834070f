//! Relay consumer: binds the CoT queue and forwards every delivery to the
//! broadcast room.
//!
//! The connection supervisor drives this type through [`ChannelHandler`].
//! All callbacks run sequentially on the supervisor's task, so the current
//! channel and registration are plain fields replaced on every reopen.

use cot_core::{Broadcast, BoxFuture, BrokerChannel, Delivery, RelayResult, Topology};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle callbacks invoked by the connection supervisor.
pub trait ChannelHandler: Send {
    type Channel: BrokerChannel;

    /// A usable channel is available (first connect or any reconnect).
    /// Errors are returned to the supervisor, which reconnects from scratch.
    fn on_channel_open<'a>(&'a mut self, channel: Arc<Self::Channel>) -> BoxFuture<'a, RelayResult<()>>;

    /// One delivery from the bound queue, in broker order.
    fn on_message(&mut self, delivery: Delivery);

    /// The channel or connection went away.
    fn on_channel_closed(&mut self, reason: &str) {
        let _ = reason;
    }
}

/// Where the consumer is in its connect/bind/consume cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    ChannelOpen,
    Consuming,
}

/// An active consumer on the bound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRegistration {
    pub queue: String,
    pub consumer_tag: String,
    pub auto_ack: bool,
}

/// Counters for operability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub channel_opens: u64,
    pub relayed: u64,
    pub dropped_undecodable: u64,
    pub emit_failures: u64,
}

/// Forwards deliveries from the CoT queue to a broadcast room.
pub struct RelayConsumer<C, B> {
    topology: Topology,
    broadcast: Arc<B>,
    channel: Option<Arc<C>>,
    registration: Option<ConsumerRegistration>,
    state: RelayState,
    stats: RelayStats,
}

impl<C: BrokerChannel, B: Broadcast> RelayConsumer<C, B> {
    pub fn new(broadcast: Arc<B>, topology: Topology) -> Self {
        Self {
            topology,
            broadcast,
            channel: None,
            registration: None,
            state: RelayState::Disconnected,
            stats: RelayStats::default(),
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn registration(&self) -> Option<&ConsumerRegistration> {
        self.registration.as_ref()
    }

    async fn open(&mut self, channel: Arc<C>) -> RelayResult<()> {
        self.stats.channel_opens += 1;
        self.release_previous().await;

        debug!("broker channel open");
        self.channel = Some(Arc::clone(&channel));
        self.state = RelayState::ChannelOpen;

        match self.register(&channel).await {
            Ok(registration) => {
                info!(
                    consumer_tag = %registration.consumer_tag,
                    queue = %registration.queue,
                    exchange = %self.topology.exchange,
                    "cot listener consuming"
                );
                self.registration = Some(registration);
                self.state = RelayState::Consuming;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, queue = %self.topology.queue, "cot listener setup failed");
                self.channel = None;
                self.state = RelayState::Disconnected;
                Err(e)
            }
        }
    }

    /// Bind the queue to the exchange and register the consumer.
    async fn register(&self, channel: &C) -> RelayResult<ConsumerRegistration> {
        let t = &self.topology;
        channel.queue_bind(&t.queue, &t.exchange).await?;
        let consumer_tag = channel.basic_consume(&t.queue, &t.consumer_tag, true).await?;
        Ok(ConsumerRegistration {
            queue: t.queue.clone(),
            consumer_tag,
            auto_ack: true,
        })
    }

    /// Cancel a registration left over on a channel that is still open, so
    /// the queue never has two consumers from this instance.
    async fn release_previous(&mut self) {
        let previous = self.channel.take();
        let registration = self.registration.take();
        if let (Some(channel), Some(registration)) = (previous, registration) {
            if !channel.is_open() {
                return;
            }
            match channel.basic_cancel(&registration.consumer_tag).await {
                Ok(()) => debug!(consumer_tag = %registration.consumer_tag, "cancelled previous consumer"),
                Err(e) => warn!(
                    consumer_tag = %registration.consumer_tag,
                    error = %e,
                    "failed to cancel previous consumer"
                ),
            }
        }
    }

    fn relay(&mut self, delivery: Delivery) {
        let text = match delivery.text() {
            Ok(text) => text,
            Err(e) => {
                self.stats.dropped_undecodable += 1;
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    bytes = delivery.payload().len(),
                    error = %e,
                    "dropping undecodable cot message"
                );
                return;
            }
        };

        match self.broadcast.emit(&self.topology.event, text, &self.topology.room) {
            Ok(()) => {
                self.stats.relayed += 1;
                trace!(
                    delivery_tag = delivery.delivery_tag,
                    exchange = %delivery.exchange,
                    routing_key = %delivery.routing_key,
                    redelivered = delivery.redelivered,
                    content_type = ?delivery.properties.content_type,
                    message_id = ?delivery.properties.message_id,
                    timestamp = ?delivery.properties.timestamp,
                    bytes = text.len(),
                    "relayed cot message"
                );
            }
            Err(e) => {
                self.stats.emit_failures += 1;
                warn!(delivery_tag = delivery.delivery_tag, error = %e, "broadcast emit failed");
            }
        }
    }
}

impl<C, B> ChannelHandler for RelayConsumer<C, B>
where
    C: BrokerChannel + 'static,
    B: Broadcast + 'static,
{
    type Channel = C;

    fn on_channel_open<'a>(&'a mut self, channel: Arc<C>) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(self.open(channel))
    }

    fn on_message(&mut self, delivery: Delivery) {
        if self.state != RelayState::Consuming {
            debug!(delivery_tag = delivery.delivery_tag, state = ?self.state, "delivery outside consuming state");
        }
        self.relay(delivery);
    }

    fn on_channel_closed(&mut self, reason: &str) {
        if self.state != RelayState::Disconnected {
            info!(
                reason = %reason,
                relayed = self.stats.relayed,
                dropped = self.stats.dropped_undecodable,
                emit_failures = self.stats.emit_failures,
                "cot listener disconnected"
            );
        }
        self.registration = None;
        self.channel = None;
        self.state = RelayState::Disconnected;
    }
}
