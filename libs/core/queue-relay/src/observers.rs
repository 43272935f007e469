use dashmap::DashMap;
use observability::RelayMetrics;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::message::ObserverId;

/// Live observer registry keyed by connection id.
///
/// Each observer owns the receiving half of a bounded channel; the hub keeps
/// the sender. A slow observer whose buffer is full misses that broadcast,
/// a dropped receiver is pruned on the next broadcast.
#[derive(Debug)]
pub struct ObserverHub {
    senders: DashMap<ObserverId, mpsc::Sender<String>>,
    buffer: usize,
}

impl ObserverHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            senders: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    pub fn register(&self) -> (ObserverId, mpsc::Receiver<String>) {
        let id = ObserverId::new();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.senders.insert(id, tx);
        RelayMetrics::set_observers(self.senders.len());
        debug!(observer = %id, "observer registered");
        (id, rx)
    }

    pub fn unregister(&self, id: ObserverId) {
        if self.senders.remove(&id).is_some() {
            RelayMetrics::set_observers(self.senders.len());
            debug!(observer = %id, "observer removed");
        }
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send `payload` to every observer except `except`, returning how many
    /// observers accepted it.
    pub fn broadcast_except(&self, payload: &str, except: Option<ObserverId>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.senders.iter() {
            if Some(*entry.key()) == except {
                continue;
            }
            match entry.value().try_send(payload.to_owned()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(observer = %entry.key(), "observer buffer full, dropping update");
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removal must happen after the iterator releases its shard locks.
        for id in closed {
            self.unregister(id);
        }
        delivered
    }
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_skips_originator() {
        let hub = ObserverHub::new(4);
        let (origin, mut origin_rx) = hub.register();
        let (_, mut other_rx) = hub.register();

        let delivered = hub.broadcast_except(r#"{"type":"log","documentId":"1"}"#, Some(origin));

        assert_eq!(delivered, 1);
        assert_eq!(
            other_rx.recv().await.as_deref(),
            Some(r#"{"type":"log","documentId":"1"}"#)
        );
        assert!(origin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_origin_reaches_everyone() {
        let hub = ObserverHub::new(4);
        let (_, mut a) = hub.register();
        let (_, mut b) = hub.register();

        assert_eq!(hub.broadcast_except("x", None), 2);
        assert_eq!(a.recv().await.as_deref(), Some("x"));
        assert_eq!(b.recv().await.as_deref(), Some("x"));
    }

    #[test]
    fn test_closed_observers_are_pruned() {
        let hub = ObserverHub::new(4);
        let (_, rx) = hub.register();
        let (_, _kept) = hub.register();
        drop(rx);

        assert_eq!(hub.broadcast_except("x", None), 1);
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn test_full_buffer_drops_only_that_copy() {
        let hub = ObserverHub::new(1);
        let (id, mut rx) = hub.register();

        assert_eq!(hub.broadcast_except("first", None), 1);
        assert_eq!(hub.broadcast_except("second", None), 0);
        assert_eq!(hub.len(), 1);
        assert_eq!(rx.try_recv().ok().as_deref(), Some("first"));

        hub.unregister(id);
        assert!(hub.is_empty());
    }
}
