//! Topic handlers.
//!
//! A handler acknowledges only after its write succeeded. Malformed or
//! invalid payloads are logged and left unacknowledged without failing the
//! consumer, so other topics and messages keep flowing.

use async_trait::async_trait;
use chrono::Utc;
use domain_accounts::NotificationDispatcher;
use queue_relay::{QueueHandler, QueueMessage, QueueRelay, ReferenceObject, RelayResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

use crate::models::{
    ConversationAnalytics, ConversationIncrement, ConversationKey, EngageMessage, IncrementMessage,
    LogMessage, LogRecord, ReceiptMessage, ReceiptRecord, CONVERSATION_REFERENCE, LOG_REFERENCE,
    RECEIPT_REFERENCE,
};
use crate::repository::IngestRepository;

fn decode<T>(message: &QueueMessage) -> Option<T>
where
    T: DeserializeOwned + Validate,
{
    let payload: T = match message.parse_json() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                topic = message.topic(),
                delivery_tag = message.delivery_tag(),
                error = %e,
                "malformed message left unacknowledged"
            );
            return None;
        }
    };
    if let Err(e) = payload.validate() {
        warn!(
            topic = message.topic(),
            delivery_tag = message.delivery_tag(),
            error = %e,
            "invalid message left unacknowledged"
        );
        return None;
    }
    Some(payload)
}

pub struct LogHandler<R> {
    repository: Arc<R>,
}

impl<R: IngestRepository> LogHandler<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: IngestRepository + 'static> QueueHandler for LogHandler<R> {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()> {
        let Some(payload) = decode::<LogMessage>(message) else {
            return Ok(());
        };
        let id = self
            .repository
            .insert_log(LogRecord::from_message(payload, Utc::now()))
            .await?;
        relay
            .ack_queue_message(message, Some(&ReferenceObject::new(LOG_REFERENCE, &id)))
            .await?;
        info!(document_id = %id, "log stored and message acknowledged");
        Ok(())
    }
}

pub struct ReceiptHandler<R> {
    repository: Arc<R>,
}

impl<R: IngestRepository> ReceiptHandler<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: IngestRepository + 'static> QueueHandler for ReceiptHandler<R> {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()> {
        let Some(payload) = decode::<ReceiptMessage>(message) else {
            return Ok(());
        };
        let id = self
            .repository
            .insert_receipt(ReceiptRecord::from_message(payload, Utc::now()))
            .await?;
        relay
            .ack_queue_message(message, Some(&ReferenceObject::new(RECEIPT_REFERENCE, &id)))
            .await?;
        info!(document_id = %id, "receipt stored and message acknowledged");
        Ok(())
    }
}

/// Opens the analytics record of a new conversation.
pub struct ConversationEngageHandler<R> {
    repository: Arc<R>,
}

impl<R: IngestRepository> ConversationEngageHandler<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: IngestRepository + 'static> QueueHandler for ConversationEngageHandler<R> {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()> {
        let Some(payload) = decode::<EngageMessage>(message) else {
            return Ok(());
        };
        let key = ConversationKey {
            company: payload.company,
            workspace_id: payload.workspace_id,
            conversation_id: payload.conversation,
        };
        let conversation_id = key.conversation_id.clone();
        let id = self
            .repository
            .insert_conversation(ConversationAnalytics::start(key, Utc::now()))
            .await?;
        relay
            .ack_queue_message(
                message,
                Some(&ReferenceObject::new(CONVERSATION_REFERENCE, &conversation_id)),
            )
            .await?;
        info!(%conversation_id, document_id = %id, "conversation stored and message acknowledged");
        Ok(())
    }
}

/// Counts one turn of an existing conversation.
pub struct ConversationIncrementHandler<R> {
    repository: Arc<R>,
}

impl<R: IngestRepository> ConversationIncrementHandler<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: IngestRepository + 'static> QueueHandler for ConversationIncrementHandler<R> {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()> {
        let Some(payload) = decode::<IncrementMessage>(message) else {
            return Ok(());
        };
        let increment = ConversationIncrement::from_turn(&payload.conversation);
        let key = ConversationKey {
            company: payload.company,
            workspace_id: payload.workspace_id,
            conversation_id: payload.conversation.context.conversation_id,
        };
        let conversation_id = key.conversation_id.clone();

        if !self.repository.increment_conversation(key, increment).await? {
            warn!(%conversation_id, "no analytics record for conversation, increment dropped");
        }
        relay
            .ack_queue_message(
                message,
                Some(&ReferenceObject::new(CONVERSATION_REFERENCE, &conversation_id)),
            )
            .await?;
        info!(%conversation_id, "conversation updated and message acknowledged");
        Ok(())
    }
}

/// Outbound email request: a conversion identifier plus arbitrary fields
/// forwarded with it.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    #[validate(length(min = 1, message = "conversionIdentifier is required"))]
    #[serde(alias = "event")]
    pub conversion_identifier: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

pub struct EmailRequestHandler<D> {
    dispatcher: Arc<D>,
}

impl<D: NotificationDispatcher> EmailRequestHandler<D> {
    pub fn new(dispatcher: Arc<D>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl<D: NotificationDispatcher + 'static> QueueHandler for EmailRequestHandler<D> {
    async fn handle(&self, relay: &QueueRelay, message: &QueueMessage) -> RelayResult<()> {
        let Some(request) = decode::<EmailRequest>(message) else {
            return Ok(());
        };
        let event = request.conversion_identifier;

        match self.dispatcher.send(&event, Value::Object(request.fields)).await {
            Ok(_) => {
                relay.ack_queue_message(message, None).await?;
                info!(%event, "email sent and message acknowledged");
            }
            Err(e) => {
                error!(
                    %event,
                    delivery_tag = message.delivery_tag(),
                    error = %e,
                    "email dispatch failed, message left unacknowledged"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::repository::MockIngestRepository;
    use domain_accounts::{AccountError, AccountResult, RecordingDispatcher};
    use queue_relay::{ObserverHub, QueueMetrics};

    fn relay() -> QueueRelay {
        QueueRelay::detached(Arc::new(QueueMetrics::new()), Arc::new(ObserverHub::new(8)))
    }

    fn message(content: &str) -> QueueMessage {
        QueueMessage::new("topic", 1, content.as_bytes().to_vec())
    }

    struct Failing;

    #[async_trait]
    impl NotificationDispatcher for Failing {
        async fn send(&self, event: &str, _payload: Value) -> AccountResult<Value> {
            Err(AccountError::dispatch(event, "endpoint down"))
        }
    }

    #[tokio::test]
    async fn test_log_is_stored_then_acked() {
        let mut repo = MockIngestRepository::new();
        repo.expect_insert_log()
            .withf(|record| record.action == "create" && record.kind == "workspace")
            .times(1)
            .returning(|_| Ok("65f0c0ffee".to_string()));

        let relay = relay();
        let msg = message(r#"{"action":"create","type":"workspace","operator":"ana"}"#);
        LogHandler::new(Arc::new(repo)).handle(&relay, &msg).await.unwrap();

        assert!(msg.is_acked());
        assert_eq!(relay.get_queue_status().messages_by_topic["log"], 1);
    }

    #[tokio::test]
    async fn test_malformed_log_is_skipped() {
        let mut repo = MockIngestRepository::new();
        repo.expect_insert_log().times(0);
        let handler = LogHandler::new(Arc::new(repo));
        let relay = relay();

        let garbage = message("{not json");
        handler.handle(&relay, &garbage).await.unwrap();
        assert!(!garbage.is_acked());

        let incomplete = message(r#"{"action":"create","type":"workspace"}"#);
        handler.handle(&relay, &incomplete).await.unwrap();
        assert!(!incomplete.is_acked());
        assert_eq!(relay.get_queue_status().messages_by_topic["log"], 0);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_receipt_unacked() {
        let mut repo = MockIngestRepository::new();
        repo.expect_insert_receipt()
            .returning(|_| Err(IngestError::Database(std::io::Error::other("store down").into())));

        let relay = relay();
        let msg = message(r#"{"client":"acme","service":"chat"}"#);
        let err = ReceiptHandler::new(Arc::new(repo))
            .handle(&relay, &msg)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("store down"));
        assert!(!msg.is_acked());
        assert_eq!(relay.get_queue_status().messages_by_topic["receipt"], 0);
    }

    #[tokio::test]
    async fn test_increment_without_record_still_acks() {
        let mut repo = MockIngestRepository::new();
        repo.expect_increment_conversation()
            .withf(|key, inc| key.conversation_id == "c1" && inc.dialog_node.is_none())
            .times(1)
            .returning(|_, _| Ok(false));

        let relay = relay();
        let msg = message(
            r#"{"company":"acme","workspaceId":"w1","conversation":{"context":{"conversation_id":"c1"}}}"#,
        );
        ConversationIncrementHandler::new(Arc::new(repo))
            .handle(&relay, &msg)
            .await
            .unwrap();

        assert!(msg.is_acked());
        assert_eq!(
            relay.get_queue_status().messages_by_topic["conversation_analytics"],
            1
        );
    }

    #[tokio::test]
    async fn test_email_request_acks_without_reference() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let relay = relay();
        let msg = message(r#"{"conversionIdentifier":"welcome","email":"a@b.c"}"#);

        EmailRequestHandler::new(dispatcher.clone())
            .handle(&relay, &msg)
            .await
            .unwrap();

        assert!(msg.is_acked());
        let sent = dispatcher.sent();
        assert_eq!(sent[0].0, "welcome");
        assert_eq!(sent[0].1["email"], "a@b.c");
        assert_eq!(relay.get_queue_status().messages_by_topic.len(), 2);
    }

    #[tokio::test]
    async fn test_email_dispatch_failure_leaves_message() {
        let relay = relay();
        let msg = message(r#"{"event":"welcome"}"#);

        EmailRequestHandler::new(Arc::new(Failing))
            .handle(&relay, &msg)
            .await
            .unwrap();

        assert!(!msg.is_acked());
    }
}
