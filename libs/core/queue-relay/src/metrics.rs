use chrono::{DateTime, Utc};
use observability::RelayMetrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Logical types counted from the first snapshot on
pub const SEEDED_TYPES: [&str; 2] = ["receipt", "log"];

/// Point-in-time copy of the relay counters
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub online_since: Option<DateTime<Utc>>,
    pub messages_by_topic: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct Counters {
    online_since: Option<DateTime<Utc>>,
    messages_by_topic: BTreeMap<String, u64>,
}

/// Acknowledgment counters owned by one relay.
///
/// Every mutation happens under the same lock, so concurrent acks never
/// lose an increment.
#[derive(Debug)]
pub struct QueueMetrics {
    counters: Mutex<Counters>,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::with_types(SEEDED_TYPES)
    }

    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let messages_by_topic = types.into_iter().map(|t| (t.into(), 0)).collect();
        Self {
            counters: Mutex::new(Counters {
                online_since: None,
                messages_by_topic,
            }),
        }
    }

    pub fn mark_online(&self, at: DateTime<Utc>) {
        self.counters.lock().online_since = Some(at);
    }

    /// Add one acknowledged message of `kind`, returning the new total.
    pub fn increment(&self, kind: &str) -> u64 {
        let total = {
            let mut counters = self.counters.lock();
            let slot = counters
                .messages_by_topic
                .entry(kind.to_string())
                .or_insert(0);
            *slot += 1;
            *slot
        };
        RelayMetrics::record_ack(kind);
        total
    }

    pub fn snapshot(&self) -> QueueStatus {
        let counters = self.counters.lock();
        QueueStatus {
            online_since: counters.online_since,
            messages_by_topic: counters.messages_by_topic.clone(),
        }
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_seeded_snapshot() {
        let status = QueueMetrics::new().snapshot();
        assert_eq!(status.online_since, None);
        assert_eq!(status.messages_by_topic.get("receipt"), Some(&0));
        assert_eq!(status.messages_by_topic.get("log"), Some(&0));
        assert_eq!(status.messages_by_topic.len(), 2);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let metrics = QueueMetrics::with_types(["log"]);
        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert!(value.get("onlineSince").is_some());
        assert_eq!(value["messagesByTopic"]["log"], 0);
    }

    #[test]
    fn test_increment_unknown_type_creates_entry() {
        let metrics = QueueMetrics::new();
        assert_eq!(metrics.increment("conversation_analytics"), 1);
        assert_eq!(metrics.increment("conversation_analytics"), 2);
        assert_eq!(
            metrics.snapshot().messages_by_topic["conversation_analytics"],
            2
        );
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let metrics = Arc::new(QueueMetrics::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.increment("receipt");
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(metrics.snapshot().messages_by_topic["receipt"], 2000);
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let metrics = QueueMetrics::new();
        let now = Utc::now();
        metrics.mark_online(now);
        let first = metrics.snapshot();
        let second = metrics.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.online_since, Some(now));
    }
}
