use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::RelayError;

/// AMQP header naming the observer whose action produced the message
pub const ORIGIN_HEADER: &str = "x-observer-id";

/// Identity of a live observer connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ObserverId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Descriptor broadcast to observers once a message is acknowledged
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "documentId")]
    pub document_id: String,
}

impl ReferenceObject {
    pub fn new(kind: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            document_id: document_id.into(),
        }
    }
}

/// A delivery owned by the relay until it is acknowledged.
#[derive(Debug)]
pub struct QueueMessage {
    topic: String,
    delivery_tag: u64,
    content: Vec<u8>,
    origin: Option<ObserverId>,
    /// Broker session the delivery arrived on; its tag is only valid there
    session: Option<u64>,
    acked: AtomicBool,
}

impl QueueMessage {
    pub fn new(topic: impl Into<String>, delivery_tag: u64, content: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            delivery_tag,
            content: content.into(),
            origin: None,
            session: None,
            acked: AtomicBool::new(false),
        }
    }

    pub fn with_origin(mut self, origin: Option<ObserverId>) -> Self {
        self.origin = origin;
        self
    }

    pub(crate) fn in_session(mut self, session: u64) -> Self {
        self.session = Some(session);
        self
    }

    pub(crate) fn session(&self) -> Option<u64> {
        self.session
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn origin(&self) -> Option<ObserverId> {
        self.origin
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    /// Decode the content as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, RelayError> {
        serde_json::from_slice(&self.content).map_err(|source| RelayError::MalformedPayload {
            topic: self.topic.clone(),
            source,
        })
    }

    /// Claim the acknowledgment. Only the first caller gets `true`.
    pub(crate) fn claim_ack(&self) -> bool {
        self.acked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the claim back after the broker refused the ack.
    pub(crate) fn release_ack(&self) {
        self.acked.store(false, Ordering::Release);
    }
}
