use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Broker, BrokerConnector, MessageStream};
use crate::error::{RelayError, RelayResult};
use crate::message::{ObserverId, QueueMessage};

#[derive(Default)]
struct Queue {
    tx: Option<mpsc::UnboundedSender<QueueMessage>>,
    rx: Option<mpsc::UnboundedReceiver<QueueMessage>>,
}

impl Queue {
    fn open() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

#[derive(Default)]
struct State {
    queues: Mutex<HashMap<String, Queue>>,
    acked: Mutex<Vec<u64>>,
    next_tag: AtomicU64,
    closed: AtomicBool,
    connects: AtomicU64,
}

/// In-process broker for tests and local runs without RabbitMQ.
///
/// Messages published before anyone consumes a topic are buffered. Each
/// topic supports a single consumer.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `content` on `topic`, returning its delivery tag.
    pub fn publish(&self, topic: &str, content: impl Into<Vec<u8>>) -> RelayResult<u64> {
        self.publish_from(topic, content, None)
    }

    pub fn publish_from(
        &self,
        topic: &str,
        content: impl Into<Vec<u8>>,
        origin: Option<ObserverId>,
    ) -> RelayResult<u64> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }
        let tag = self.state.next_tag.fetch_add(1, Ordering::AcqRel) + 1;
        let message = QueueMessage::new(topic, tag, content).with_origin(origin);

        let mut queues = self.state.queues.lock();
        let queue = queues.entry(topic.to_string()).or_insert_with(Queue::open);
        queue
            .tx
            .as_ref()
            .ok_or(RelayError::Closed)?
            .send(message)
            .map_err(|_| RelayError::Closed)?;
        Ok(tag)
    }

    pub fn acked_tags(&self) -> Vec<u64> {
        self.state.acked.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Number of sessions opened through [`BrokerConnector::connect`].
    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn consume(&self, topic: &str) -> RelayResult<MessageStream> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        let mut queues = self.state.queues.lock();
        let queue = queues.entry(topic.to_string()).or_insert_with(Queue::open);
        let rx = queue
            .rx
            .take()
            .ok_or_else(|| RelayError::AlreadyConsuming(topic.to_string()))?;
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        self.state.acked.lock().push(delivery_tag);
        Ok(())
    }

    async fn close(&self) -> RelayResult<()> {
        self.state.closed.store(true, Ordering::Release);
        // Dropping the senders ends every consumer stream.
        for queue in self.state.queues.lock().values_mut() {
            queue.tx = None;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> RelayResult<Arc<dyn Broker>> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        self.state.connects.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffers_until_consumed() {
        let broker = MemoryBroker::new();
        let tag = broker.publish("logs", "a").unwrap();

        let mut stream = broker.consume("logs").await.unwrap();
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.delivery_tag(), tag);
        assert_eq!(message.content(), b"a");
        assert_eq!(message.topic(), "logs");
    }

    #[tokio::test]
    async fn test_single_consumer_per_topic() {
        let broker = MemoryBroker::new();
        let _stream = broker.consume("logs").await.unwrap();
        let err = broker.consume("logs").await.err().unwrap();
        assert!(matches!(err, RelayError::AlreadyConsuming(topic) if topic == "logs"));
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_rejects_acks() {
        let broker = MemoryBroker::new();
        let mut stream = broker.consume("receipts").await.unwrap();
        broker.ack(1).await.unwrap();

        broker.close().await.unwrap();

        assert!(stream.next().await.is_none());
        assert!(matches!(broker.ack(2).await, Err(RelayError::Closed)));
        assert!(broker.publish("receipts", "late").is_err());
        assert_eq!(broker.acked_tags(), vec![1]);
    }
}
