//! Ingest topics.
//!
//! Handlers for the broker topics that feed the document store: audit
//! logs, service receipts, conversation analytics and outbound email
//! requests. Each one implements [`queue_relay::QueueHandler`] and is
//! registered on a [`queue_relay::QueueRelay`] by the application.

pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod mongodb;
pub mod repository;

pub use error::{IngestError, IngestResult};
pub use handlers::{
    ConversationEngageHandler, ConversationIncrementHandler, EmailRequest, EmailRequestHandler,
    LogHandler, ReceiptHandler,
};
pub use memory::InMemoryIngestRepository;
pub use models::{
    ConversationAnalytics, ConversationIncrement, ConversationKey, DateComponents, LogRecord,
    ReceiptRecord,
};
pub use self::mongodb::MongoIngestRepository;
pub use repository::IngestRepository;
