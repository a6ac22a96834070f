//! RabbitMQ side of the relay: the lapin channel adapter and the connection
//! supervisor that keeps a consumer registered across reconnects.

pub mod amqp;
pub mod backoff;
pub mod supervisor;

pub use amqp::{AmqpChannel, AmqpConnector};
pub use backoff::Backoff;
pub use supervisor::{BrokerConnector, RelayHandle, Supervisor};
