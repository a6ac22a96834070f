//! Relay server: owns the room hub, accepts subscribers, and runs the
//! broker supervisor when the relay is enabled.

use crate::broker::{AmqpChannel, AmqpConnector, Backoff, RelayHandle, Supervisor};
use crate::config::RelayConfig;
use crate::relay::{RelayConsumer, RoomHub};
use crate::transport::websocket;
use cot_core::{RelayResult, Topology};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// The relay process: subscriber listener plus broker relay.
pub struct RelayServer {
    config: RelayConfig,
    topology: Topology,
    hub: Arc<RoomHub>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let topology = Topology::default();
        let hub = Arc::new(RoomHub::new(config.room_capacity, [topology.room.clone()]));
        Self {
            config,
            topology,
            hub,
        }
    }

    /// Start the CoT relay, or log that it is disabled.
    fn start_relay(&self) -> Option<RelayHandle> {
        if !self.config.enabled {
            info!("cot relay is disabled");
            return None;
        }

        let topology = self.topology.clone();
        info!(
            broker = %self.config.broker.display_addr(),
            exchange = %topology.exchange,
            room = %topology.room,
            "starting cot relay"
        );
        let consumer: RelayConsumer<AmqpChannel, RoomHub> =
            RelayConsumer::new(Arc::clone(&self.hub), topology);
        let backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);
        let connector = AmqpConnector::new(self.config.broker.clone());
        Some(Supervisor::spawn(connector, backoff, consumer))
    }

    /// Serve subscribers until `shutdown` resolves, then stop the relay.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> RelayResult<()> {
        let mut connections =
            websocket::start_listener(self.config.listen_addr, Arc::clone(&self.hub)).await?;
        let relay = self.start_relay();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                conn = connections.recv() => match conn {
                    Some(conn) => {
                        tokio::spawn(websocket::handle_subscriber(conn, Arc::clone(&self.hub)));
                    }
                    None => {
                        warn!("WebSocket listener stopped");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
            }
        }

        if let Some(relay) = relay {
            relay.stop().await;
        }
        info!(rooms = self.hub.rooms().len(), "subscriber listener closed");
        Ok(())
    }
}
