use thiserror::Error;

/// Errors raised by the relay and its broker backends
#[derive(Error, Debug)]
pub enum RelayError {
    /// AMQP connection, channel or command failure
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Passive queue check failed
    #[error("Queue '{topic}' is not available: {details}")]
    QueueUnavailable { topic: String, details: String },

    /// Message content is not the JSON the handler expects
    #[error("Malformed payload on '{topic}': {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Relay is not connected to a broker")]
    NotConnected,

    /// The session the delivery arrived on was lost; the broker redelivers it
    #[error("Delivery {0} belongs to a lost broker session")]
    StaleDelivery(u64),

    #[error("Topic '{0}' already has a consumer")]
    AlreadyConsuming(String),

    #[error("Broker is closed")]
    Closed,

    /// Domain failure reported by a topic handler
    #[error("Handler error: {0}")]
    Handler(String),
}

impl RelayError {
    pub fn handler(message: impl Into<String>) -> Self {
        RelayError::Handler(message.into())
    }

    /// Malformed input is never worth redelivering to the same handler
    pub fn is_malformed(&self) -> bool {
        matches!(self, RelayError::MalformedPayload { .. })
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
