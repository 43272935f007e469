//! Message queue relay
//!
//! Consumes broker topics, hands each delivery to its topic handler in a
//! separate task, acknowledges every delivery at most once and fans the
//! acknowledged reference out to live observers, skipping the observer that
//! produced the message.
//!
//! ```ignore
//! use queue_relay::{AmqpConnector, ObserverHub, QueueMetrics, QueueRelay, RelayConfig};
//!
//! let config = RelayConfig::from_env()?;
//! let relay = QueueRelay::new(
//!     Arc::new(AmqpConnector::new(&config)),
//!     Arc::new(QueueMetrics::new()),
//!     Arc::new(ObserverHub::new(config.observer_buffer)),
//! )
//! .with_reconnect(config.reconnect_policy());
//! relay.listen_queue_topic("logs", Arc::new(LogHandler::new(repo))).await?;
//! relay.connect().await?;
//! ```

pub mod broker;
mod config;
mod error;
mod handler;
mod message;
mod metrics;
mod observers;
mod relay;

pub use broker::{AmqpBroker, AmqpConnector, Broker, BrokerConnector, MemoryBroker, MessageStream};
pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use handler::QueueHandler;
pub use message::{ObserverId, QueueMessage, ReferenceObject, ORIGIN_HEADER};
pub use metrics::{QueueMetrics, QueueStatus, SEEDED_TYPES};
pub use observers::ObserverHub;
pub use relay::QueueRelay;
