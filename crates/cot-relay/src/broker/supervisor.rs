//! Connection supervisor: connect, open a channel, hand it to the relay,
//! dispatch deliveries, and reconnect with backoff whenever anything drops.
//!
//! Broker failures never escape this task. They are logged and followed by a
//! reconnect until the relay is stopped.

use super::backoff::Backoff;
use crate::relay::ChannelHandler;
use cot_core::{BoxFuture, BrokerChannel, Delivery, RelayResult};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long [`RelayHandle::stop`] waits before aborting the task.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Deliveries for the consumer registered on a channel, in broker order.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = RelayResult<Delivery>> + Send>>;

/// Opens broker channels for the supervisor.
pub trait BrokerConnector: Send + 'static {
    type Channel: BrokerChannel + 'static;

    /// Broker address for logs.
    fn describe(&self) -> String;

    /// Connect (replacing any previous connection) and open one channel.
    fn connect<'a>(&'a mut self) -> BoxFuture<'a, RelayResult<Arc<Self::Channel>>>;

    /// Deliveries for the consumer registered on `channel` during channel
    /// open.
    fn deliveries(&mut self, channel: &Self::Channel) -> RelayResult<DeliveryStream>;

    /// Close `channel` and its connection on shutdown.
    fn close<'a>(&'a mut self, channel: &'a Self::Channel) -> BoxFuture<'a, ()>;
}

/// Why a consuming session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The broker closed the consumer stream.
    Closed,
    /// Shutdown was requested.
    Shutdown,
}

/// Handle to a running supervisor task.
pub struct RelayHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Close the channel and connection, then wait for the task to finish.
    /// A task stuck in a connect attempt is aborted after [`STOP_TIMEOUT`].
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(STOP_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "relay task ended abnormally"),
            Err(_) => {
                warn!("relay did not stop in time, aborting");
                self.task.abort();
            }
        }
    }
}

/// Owns the broker connection on behalf of a [`ChannelHandler`].
pub struct Supervisor<K, H> {
    connector: K,
    backoff: Backoff,
    handler: H,
    shutdown: watch::Receiver<bool>,
}

impl<K, H> Supervisor<K, H>
where
    K: BrokerConnector,
    H: ChannelHandler<Channel = K::Channel> + 'static,
{
    fn new(connector: K, backoff: Backoff, handler: H, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            connector,
            backoff,
            handler,
            shutdown,
        }
    }

    /// Start supervising on a new task.
    pub fn spawn(connector: K, backoff: Backoff, handler: H) -> RelayHandle {
        let (shutdown_tx, shutdown) = watch::channel(false);
        let supervisor = Self::new(connector, backoff, handler, shutdown);
        let task = tokio::spawn(supervisor.run());
        RelayHandle { shutdown_tx, task }
    }

    async fn run(mut self) {
        while let Some(delay) = self.cycle().await {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        self.handler.on_channel_closed("relay stopped");
        info!(broker = %self.connector.describe(), "relay stopped");
    }

    /// Run one session to its end. Returns the delay before reconnecting,
    /// or `None` once shutdown was requested.
    async fn cycle(&mut self) -> Option<Duration> {
        if self.stopping() {
            return None;
        }
        let broker = self.connector.describe();

        match self.session().await {
            Ok(SessionEnd::Shutdown) => return None,
            Ok(SessionEnd::Closed) => {
                warn!(broker = %broker, "broker closed the consumer");
                self.handler.on_channel_closed("consumer stream closed");
            }
            Err(e) => {
                warn!(broker = %broker, error = %e, "broker session failed");
                self.handler.on_channel_closed(&e.to_string());
            }
        }

        if self.stopping() {
            return None;
        }
        let delay = self.backoff.next_delay();
        info!(
            broker = %broker,
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.attempt(),
            "reconnecting to broker"
        );
        Some(delay)
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// One connection lifetime.
    async fn session(&mut self) -> RelayResult<SessionEnd> {
        let channel = self.connector.connect().await?;
        info!(broker = %self.connector.describe(), "connected to broker");

        self.handler.on_channel_open(Arc::clone(&channel)).await?;
        let deliveries = self.connector.deliveries(&channel)?;
        self.backoff.reset();

        let end = pump(&mut self.handler, deliveries, &mut self.shutdown).await;
        if matches!(end, Ok(SessionEnd::Shutdown)) {
            self.connector.close(&channel).await;
        }
        end
    }
}

/// Feed deliveries to the handler, one at a time and in order, until the
/// stream ends, fails, or shutdown is signalled.
pub async fn pump<H, S>(
    handler: &mut H,
    mut deliveries: S,
    shutdown: &mut watch::Receiver<bool>,
) -> RelayResult<SessionEnd>
where
    H: ChannelHandler,
    S: Stream<Item = RelayResult<Delivery>> + Unpin,
{
    loop {
        tokio::select! {
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => handler.on_message(delivery),
                Some(Err(e)) => return Err(e),
                None => return Ok(SessionEnd::Closed),
            },
            _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),
        }
    }
}
