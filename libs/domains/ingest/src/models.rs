use chrono::{DateTime, Datelike, Duration, Utc};
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use validator::Validate;

pub const LOGS_COLLECTION: &str = "logs";
pub const RECEIPTS_COLLECTION: &str = "receipts";
pub const CONVERSATION_ANALYTICS_COLLECTION: &str = "conversation_analytics";

/// Reference types broadcast to observers
pub const LOG_REFERENCE: &str = "log";
pub const RECEIPT_REFERENCE: &str = "receipt";
pub const CONVERSATION_REFERENCE: &str = "conversation_analytics";

fn bson_time(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LogMessage {
    #[validate(length(min = 1, message = "action is required"))]
    #[serde(default)]
    pub action: String,
    #[validate(length(min = 1, message = "type is required"))]
    #[serde(rename = "type", default)]
    pub kind: String,
    #[validate(length(min = 1, message = "operator is required"))]
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptMessage {
    /// Producer-side time; the stored record is stamped on arrival.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[validate(length(min = 1, message = "client is required"))]
    #[serde(default)]
    pub client: String,
    #[validate(length(min = 1, message = "service is required"))]
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EngageMessage {
    #[validate(length(min = 1))]
    pub company: String,
    pub workspace_id: String,
    /// Conversation id
    #[validate(length(min = 1))]
    pub conversation: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IncrementMessage {
    #[validate(length(min = 1))]
    pub company: String,
    pub workspace_id: String,
    #[validate(nested)]
    pub conversation: ConversationTurn,
}

/// One assistant turn as produced by the conversation service
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConversationTurn {
    #[validate(nested)]
    pub context: TurnContext,
    #[serde(default)]
    pub intents: Vec<IntentMatch>,
    #[serde(default)]
    pub entities: Vec<EntityMatch>,
    #[serde(default)]
    pub output: Option<TurnOutput>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TurnContext {
    #[validate(length(min = 1, message = "context.conversation_id is required"))]
    pub conversation_id: String,
    #[serde(rename = "shouldAskFeedback", default)]
    pub should_ask_feedback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentMatch {
    pub intent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityMatch {
    pub entity: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnOutput {
    #[serde(default)]
    pub nodes_visited: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub action: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub operator: String,
    pub timestamp: BsonDateTime,
    pub details: Value,
}

impl LogRecord {
    pub fn from_message(message: LogMessage, at: DateTime<Utc>) -> Self {
        Self {
            action: message.action,
            kind: message.kind,
            operator: message.operator,
            timestamp: bson_time(at),
            details: message
                .details
                .unwrap_or_else(|| Value::Object(Default::default())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRecord {
    pub timestamp: BsonDateTime,
    pub client: String,
    pub service: String,
    pub workspace_id: Option<String>,
}

impl ReceiptRecord {
    pub fn from_message(message: ReceiptMessage, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: bson_time(at),
            client: message.client,
            service: message.service,
            workspace_id: message.workspace_id,
        }
    }
}

/// Calendar breakdown of the day a conversation started.
///
/// `month` is zero based and `dayOfWeek` counts from Sunday. `week` uses
/// Sunday-started weeks where the week holding January 1st is week 1;
/// `isoWeek` is the ISO 8601 week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateComponents {
    pub year: i32,
    pub month: u32,
    pub week: u32,
    pub iso_week: u32,
    pub day_of_month: u32,
    pub day_of_week: u32,
}

impl DateComponents {
    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month0(),
            week: sunday_week(at),
            iso_week: at.iso_week().week(),
            day_of_month: at.day(),
            day_of_week: at.weekday().num_days_from_sunday(),
        }
    }
}

fn sunday_week(at: DateTime<Utc>) -> u32 {
    let saturday = at + Duration::days(i64::from(6 - at.weekday().num_days_from_sunday()));
    if saturday.year() != at.year() {
        return 1;
    }
    let jan_first = at.with_ordinal(1).unwrap_or(at);
    (at.ordinal0() + jan_first.weekday().num_days_from_sunday()) / 7 + 1
}

/// Identity of one analytics document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub company: String,
    pub workspace_id: String,
    pub conversation_id: String,
}

impl ConversationKey {
    pub fn filter(&self) -> Document {
        doc! {
            "company": self.company.as_str(),
            "workspaceId": self.workspace_id.as_str(),
            "conversationId": self.conversation_id.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAnalytics {
    pub company: String,
    pub workspace_id: String,
    pub conversation_id: String,
    pub interaction_count: i64,
    pub failed_interactions_count: i64,
    pub feedback_request_count: i64,
    pub date_string: String,
    pub date: BsonDateTime,
    pub date_components: DateComponents,
    pub last_updated_at: Option<BsonDateTime>,
    pub intent_frequency: BTreeMap<String, i64>,
    pub entity_frequency: BTreeMap<String, i64>,
    pub dialog_node_frequency: BTreeMap<String, i64>,
}

impl ConversationAnalytics {
    /// Fresh record with every counter at zero
    pub fn start(key: ConversationKey, at: DateTime<Utc>) -> Self {
        Self {
            company: key.company,
            workspace_id: key.workspace_id,
            conversation_id: key.conversation_id,
            interaction_count: 0,
            failed_interactions_count: 0,
            feedback_request_count: 0,
            date_string: at.format("%Y%m%d").to_string(),
            date: bson_time(at),
            date_components: DateComponents::of(at),
            last_updated_at: None,
            intent_frequency: BTreeMap::new(),
            entity_frequency: BTreeMap::new(),
            dialog_node_frequency: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey {
            company: self.company.clone(),
            workspace_id: self.workspace_id.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }

    /// In-memory equivalent of [`ConversationIncrement::to_update`]
    pub fn apply(&mut self, increment: &ConversationIncrement, at: DateTime<Utc>) {
        self.interaction_count += 1;
        if let Some(intent) = &increment.intent {
            *self.intent_frequency.entry(field_key(intent)).or_default() += 1;
        }
        if let Some(entity) = &increment.entity {
            *self.entity_frequency.entry(field_key(entity)).or_default() += 1;
        }
        match &increment.dialog_node {
            Some(node) => *self.dialog_node_frequency.entry(field_key(node)).or_default() += 1,
            None => self.failed_interactions_count += 1,
        }
        if increment.feedback_requested {
            self.feedback_request_count += 1;
        }
        self.last_updated_at = Some(bson_time(at));
    }
}

/// Counters touched by one conversation turn. Only the first intent, entity
/// and visited dialog node count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationIncrement {
    pub intent: Option<String>,
    pub entity: Option<String>,
    /// `None` means no node answered the turn
    pub dialog_node: Option<String>,
    pub feedback_requested: bool,
}

impl ConversationIncrement {
    pub fn from_turn(turn: &ConversationTurn) -> Self {
        let non_empty = |s: &String| !s.is_empty();
        Self {
            intent: turn.intents.first().map(|i| i.intent.clone()).filter(non_empty),
            entity: turn.entities.first().map(|e| e.entity.clone()).filter(non_empty),
            dialog_node: turn
                .output
                .as_ref()
                .and_then(|o| o.nodes_visited.first().cloned())
                .filter(non_empty),
            feedback_requested: turn.context.should_ask_feedback,
        }
    }

    /// `$inc`/`$set` update applied atomically to the analytics document
    pub fn to_update(&self, at: DateTime<Utc>) -> Document {
        let mut inc = doc! { "interactionCount": 1_i64 };
        if let Some(intent) = &self.intent {
            inc.insert(format!("intentFrequency.{}", field_key(intent)), 1_i64);
        }
        if let Some(entity) = &self.entity {
            inc.insert(format!("entityFrequency.{}", field_key(entity)), 1_i64);
        }
        match &self.dialog_node {
            Some(node) => {
                inc.insert(format!("dialogNodeFrequency.{}", field_key(node)), 1_i64);
            }
            None => {
                inc.insert("failedInteractionsCount", 1_i64);
            }
        }
        if self.feedback_requested {
            inc.insert("feedbackRequestCount", 1_i64);
        }
        doc! { "$inc": inc, "$set": { "lastUpdatedAt": bson_time(at) } }
    }
}

/// Map keys may not contain `.` or start with `$` in an update path.
fn field_key(name: &str) -> String {
    let key = name.replace('.', "_");
    match key.strip_prefix('$') {
        Some(rest) => format!("_{rest}"),
        None => key,
    }
}
