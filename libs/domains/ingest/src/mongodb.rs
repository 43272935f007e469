//! MongoDB implementation of IngestRepository

use async_trait::async_trait;
use chrono::Utc;
use mongodb::{bson::Bson, Collection, Database};
use tracing::instrument;

use crate::error::IngestResult;
use crate::models::{
    ConversationAnalytics, ConversationIncrement, ConversationKey, LogRecord, ReceiptRecord,
    CONVERSATION_ANALYTICS_COLLECTION, LOGS_COLLECTION, RECEIPTS_COLLECTION,
};
use crate::repository::IngestRepository;

pub struct MongoIngestRepository {
    logs: Collection<LogRecord>,
    receipts: Collection<ReceiptRecord>,
    conversations: Collection<ConversationAnalytics>,
}

impl MongoIngestRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            logs: db.collection(LOGS_COLLECTION),
            receipts: db.collection(RECEIPTS_COLLECTION),
            conversations: db.collection(CONVERSATION_ANALYTICS_COLLECTION),
        }
    }
}

fn id_string(id: Bson) -> String {
    match id {
        Bson::ObjectId(id) => id.to_hex(),
        Bson::String(id) => id,
        other => other.to_string(),
    }
}

#[async_trait]
impl IngestRepository for MongoIngestRepository {
    #[instrument(skip(self, record), fields(kind = %record.kind))]
    async fn insert_log(&self, record: LogRecord) -> IngestResult<String> {
        Ok(id_string(self.logs.insert_one(record).await?.inserted_id))
    }

    #[instrument(skip(self, record), fields(client = %record.client))]
    async fn insert_receipt(&self, record: ReceiptRecord) -> IngestResult<String> {
        Ok(id_string(self.receipts.insert_one(record).await?.inserted_id))
    }

    #[instrument(skip(self, record), fields(conversation_id = %record.conversation_id))]
    async fn insert_conversation(&self, record: ConversationAnalytics) -> IngestResult<String> {
        Ok(id_string(self.conversations.insert_one(record).await?.inserted_id))
    }

    #[instrument(skip(self, increment), fields(conversation_id = %key.conversation_id))]
    async fn increment_conversation(
        &self,
        key: ConversationKey,
        increment: ConversationIncrement,
    ) -> IngestResult<bool> {
        let result = self
            .conversations
            .update_one(key.filter(), increment.to_update(Utc::now()))
            .await?;
        Ok(result.matched_count > 0)
    }
}
