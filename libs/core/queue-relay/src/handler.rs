use async_trait::async_trait;

use crate::error::RelayResult;
use crate::message::QueueMessage;
use crate::relay::QueueRelay;

/// Per-topic message handler.
///
/// The handler owns acknowledgment: it calls
/// [`QueueRelay::ack_queue_message`] once the message is processed, or
/// leaves it unacknowledged so the broker redelivers it to the next
/// process. Returning an error has the same effect as not acknowledging.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()>;
}
