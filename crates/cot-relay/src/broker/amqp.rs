//! lapin-backed [`BrokerConnector`] and [`BrokerChannel`].
//!
//! `basic_consume` parks the lapin consumer stream inside the adapter; the
//! supervisor takes it afterwards and drives deliveries into the handler.

use super::supervisor::{BrokerConnector, DeliveryStream};
use crate::config::BrokerParams;
use cot_core::{BoxFuture, BrokerChannel, Delivery, DeliveryProperties, RelayError, RelayResult};
use futures_util::StreamExt;
use lapin::options::{BasicCancelOptions, BasicConsumeOptions, QueueBindOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Opens lapin connections and channels from [`BrokerParams`].
pub struct AmqpConnector {
    params: BrokerParams,
    connection: Option<Connection>,
}

impl AmqpConnector {
    pub fn new(params: BrokerParams) -> Self {
        Self {
            params,
            connection: None,
        }
    }
}

impl BrokerConnector for AmqpConnector {
    type Channel = AmqpChannel;

    fn describe(&self) -> String {
        self.params.display_addr()
    }

    fn connect<'a>(&'a mut self) -> BoxFuture<'a, RelayResult<Arc<AmqpChannel>>> {
        Box::pin(async move {
            // Dropping the previous connection closes it.
            self.connection = None;
            let broker = self.params.display_addr();
            let connection = Connection::connect(&self.params.uri(), ConnectionProperties::default())
                .await
                .map_err(|e| RelayError::Broker(format!("connect to {broker} failed: {e}")))?;
            let channel = connection
                .create_channel()
                .await
                .map_err(|e| RelayError::Broker(format!("channel open failed: {e}")))?;
            self.connection = Some(connection);
            Ok(Arc::new(AmqpChannel::new(channel)))
        })
    }

    fn deliveries(&mut self, channel: &AmqpChannel) -> RelayResult<DeliveryStream> {
        let consumer = channel
            .take_consumer()
            .ok_or_else(|| RelayError::Consume("no consumer registered on channel open".into()))?;
        Ok(Box::pin(consumer.map(|result| {
            result
                .map(into_delivery)
                .map_err(|e| RelayError::Broker(format!("consumer stream error: {e}")))
        })))
    }

    fn close<'a>(&'a mut self, channel: &'a AmqpChannel) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "channel close failed");
            }
            if let Some(connection) = self.connection.take() {
                if let Err(e) = connection.close(200, "relay stopped").await {
                    warn!(error = %e, "connection close failed");
                }
            }
        })
    }
}

/// A lapin channel plus the consumer registered on it, if any.
pub struct AmqpChannel {
    channel: Channel,
    consumer: Mutex<Option<Consumer>>,
}

impl AmqpChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            consumer: Mutex::new(None),
        }
    }

    /// Take the consumer stream registered by the last `basic_consume`.
    pub fn take_consumer(&self) -> Option<Consumer> {
        self.consumer.lock().ok().and_then(|mut slot| slot.take())
    }

    fn park_consumer(&self, consumer: Consumer) -> RelayResult<()> {
        let mut slot = self
            .consumer
            .lock()
            .map_err(|_| RelayError::Consume("consumer slot lock poisoned".into()))?;
        *slot = Some(consumer);
        Ok(())
    }

    /// Close the channel with a normal reply code.
    pub async fn close(&self) -> RelayResult<()> {
        self.channel
            .close(200, "relay stopped")
            .await
            .map_err(|e| RelayError::Broker(format!("channel close failed: {e}")))
    }
}

impl BrokerChannel for AmqpChannel {
    fn queue_bind<'a>(&'a self, queue: &'a str, exchange: &'a str) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            self.channel
                .queue_bind(
                    queue,
                    exchange,
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| RelayError::Bind(format!("{queue} -> {exchange}: {e}")))
        })
    }

    fn basic_consume<'a>(
        &'a self,
        queue: &'a str,
        consumer_tag: &'a str,
        auto_ack: bool,
    ) -> BoxFuture<'a, RelayResult<String>> {
        Box::pin(async move {
            let options = BasicConsumeOptions {
                no_ack: auto_ack,
                ..BasicConsumeOptions::default()
            };
            let consumer = self
                .channel
                .basic_consume(queue, consumer_tag, options, FieldTable::default())
                .await
                .map_err(|e| RelayError::Consume(format!("{queue} ({consumer_tag}): {e}")))?;
            let tag = consumer.tag().as_str().to_string();
            self.park_consumer(consumer)?;
            Ok(tag)
        })
    }

    fn basic_cancel<'a>(&'a self, consumer_tag: &'a str) -> BoxFuture<'a, RelayResult<()>> {
        Box::pin(async move {
            self.channel
                .basic_cancel(consumer_tag, BasicCancelOptions::default())
                .await
                .map_err(|e| RelayError::Consume(format!("cancel {consumer_tag}: {e}")))?;
            debug!(consumer_tag = %consumer_tag, "consumer cancelled");
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

/// Convert a lapin delivery into the relay's owned [`Delivery`].
pub fn into_delivery(mut delivery: lapin::message::Delivery) -> Delivery {
    let properties = DeliveryProperties {
        content_type: delivery
            .properties
            .content_type()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        message_id: delivery
            .properties
            .message_id()
            .as_ref()
            .map(|s| s.as_str().to_string()),
        timestamp: *delivery.properties.timestamp(),
    };
    let payload = std::mem::take(&mut delivery.data);

    Delivery::new(delivery.delivery_tag, payload)
        .with_route(delivery.exchange.as_str(), delivery.routing_key.as_str())
        .with_redelivered(delivery.redelivered)
        .with_properties(properties)
}
