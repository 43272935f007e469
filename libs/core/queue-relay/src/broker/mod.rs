//! Broker backends.
//!
//! The relay only needs three things from a broker: a stream of deliveries
//! per topic, an acknowledgment by delivery tag and a way to close.

mod amqp;
mod memory;

pub use amqp::{AmqpBroker, AmqpConnector};
pub use memory::MemoryBroker;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::error::RelayResult;
use crate::message::QueueMessage;

pub type MessageStream = BoxStream<'static, RelayResult<QueueMessage>>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Start consuming `topic`. The stream ends when the broker closes.
    async fn consume(&self, topic: &str) -> RelayResult<MessageStream>;

    async fn ack(&self, delivery_tag: u64) -> RelayResult<()>;

    async fn close(&self) -> RelayResult<()>;
}

/// Opens broker sessions for a relay.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> RelayResult<Arc<dyn Broker>>;
}
