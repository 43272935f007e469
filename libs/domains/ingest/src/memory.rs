use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use parking_lot::RwLock;

use crate::error::IngestResult;
use crate::models::{
    ConversationAnalytics, ConversationIncrement, ConversationKey, LogRecord, ReceiptRecord,
};
use crate::repository::IngestRepository;

#[derive(Debug, Default)]
struct Store {
    logs: Vec<(String, LogRecord)>,
    receipts: Vec<(String, ReceiptRecord)>,
    conversations: Vec<(String, ConversationAnalytics)>,
}

/// Ingest store kept in process memory (test mode and tests)
#[derive(Debug, Default)]
pub struct InMemoryIngestRepository {
    store: RwLock<Store>,
}

impl InMemoryIngestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.store.read().logs.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn receipts(&self) -> Vec<ReceiptRecord> {
        self.store.read().receipts.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn conversation(&self, key: &ConversationKey) -> Option<ConversationAnalytics> {
        self.store
            .read()
            .conversations
            .iter()
            .find(|(_, c)| c.key() == *key)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait]
impl IngestRepository for InMemoryIngestRepository {
    async fn insert_log(&self, record: LogRecord) -> IngestResult<String> {
        let id = ObjectId::new().to_hex();
        self.store.write().logs.push((id.clone(), record));
        Ok(id)
    }

    async fn insert_receipt(&self, record: ReceiptRecord) -> IngestResult<String> {
        let id = ObjectId::new().to_hex();
        self.store.write().receipts.push((id.clone(), record));
        Ok(id)
    }

    async fn insert_conversation(&self, record: ConversationAnalytics) -> IngestResult<String> {
        let id = ObjectId::new().to_hex();
        self.store.write().conversations.push((id.clone(), record));
        Ok(id)
    }

    async fn increment_conversation(
        &self,
        key: ConversationKey,
        increment: ConversationIncrement,
    ) -> IngestResult<bool> {
        let mut store = self.store.write();
        match store.conversations.iter_mut().find(|(_, c)| c.key() == key) {
            Some((_, record)) => {
                record.apply(&increment, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
