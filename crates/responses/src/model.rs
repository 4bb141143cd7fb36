//! Response / conversation / tool-execution / idempotency row shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::ResponseStatus;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResponseRow {
    pub id: String,
    pub caller_identity: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub input: Value,
    pub output: Option<Value>,
    pub status: String,
    pub stream: bool,
    pub background: bool,
    pub store: bool,
    pub metadata: Value,
    pub usage: Option<Value>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub conversation_id: Option<String>,
    pub previous_response_id: Option<String>,
    pub webhook_url: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResponseRow {
    pub fn status(&self) -> ResponseStatus {
        crate::status::parse(&self.status)
    }
}

/// Public, wire-facing view of a response row (§6 "the response row's
/// public form").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePublic {
    pub id: String,
    pub model: String,
    pub status: String,
    pub output: Option<Value>,
    pub usage: Option<Value>,
    pub error: Option<ResponseErrorPublic>,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseErrorPublic {
    pub kind: String,
    pub message: String,
}

impl From<&ResponseRow> for ResponsePublic {
    fn from(row: &ResponseRow) -> Self {
        Self {
            id: row.id.clone(),
            model: row.model.clone(),
            status: row.status.clone(),
            output: row.output.clone(),
            usage: row.usage.clone(),
            error: row.error_kind.clone().map(|kind| ResponseErrorPublic {
                kind,
                message: row.error_message.clone().unwrap_or_default(),
            }),
            conversation_id: row.conversation_id.clone(),
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub owner_identity: String,
    pub active_branch: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: String,
    pub conversation_id: String,
    pub branch: String,
    pub sequence_number: i64,
    pub role: String,
    pub content: Value,
    pub response_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ToolExecutionRow {
    pub id: uuid::Uuid,
    pub response_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<Value>,
    pub status: String,
    pub error_message: Option<String>,
    pub execution_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyKeyRow {
    pub caller_identity: String,
    pub key: String,
    pub request_hash: String,
    pub response_id: String,
    pub created_at: DateTime<Utc>,
}
