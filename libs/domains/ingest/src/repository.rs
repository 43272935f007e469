use async_trait::async_trait;

use crate::error::IngestResult;
use crate::models::{
    ConversationAnalytics, ConversationIncrement, ConversationKey, LogRecord, ReceiptRecord,
};

/// Persistence for the ingest topics. Inserts return the new document id
/// as a hex string.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestRepository: Send + Sync {
    async fn insert_log(&self, record: LogRecord) -> IngestResult<String>;

    async fn insert_receipt(&self, record: ReceiptRecord) -> IngestResult<String>;

    async fn insert_conversation(&self, record: ConversationAnalytics) -> IngestResult<String>;

    /// Apply one turn's counters atomically. `false` when no analytics
    /// document exists for `key`.
    async fn increment_conversation(
        &self,
        key: ConversationKey,
        increment: ConversationIncrement,
    ) -> IngestResult<bool>;
}
