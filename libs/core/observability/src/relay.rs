use metrics::{counter, gauge};

/// Metrics for broker consumption and observer fan-out
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_ack(reference_type: &str) {
        counter!("queue_relay_messages_acked_total", "type" => reference_type.to_string())
            .increment(1);
    }

    /// A handler declined to acknowledge (malformed or failed payload)
    pub fn record_rejected(topic: &str) {
        counter!("queue_relay_messages_rejected_total", "topic" => topic.to_string())
            .increment(1);
    }

    pub fn set_observers(count: usize) {
        gauge!("queue_relay_observers").set(count as f64);
    }
}
