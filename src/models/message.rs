use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// The central branching entity.
///
/// `reply_to_message_id` forms the reply graph: an assistant message points
/// at the user message it answers, a follow-up user message points at the
/// assistant it continues from. Alternative versions of one user turn share
/// an `edit_group_id`, which equals the first version's own id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    /// Retrieval fingerprint frozen into assistant records
    pub sources: Option<serde_json::Value>,
    pub source_chunks: Option<serde_json::Value>,
    pub prompt_snapshot: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub edit_group_id: Option<i64>,
    pub version_index: i32,
    pub is_edited: bool,
    /// Archived messages are excluded from export and default listing; they
    /// are never used to prune branches during retrieval.
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Sources as the string list frozen at generation time.
    pub fn source_list(&self) -> Vec<String> {
        self.sources
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// A single step of the active branch, as fed to retrieval and the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchMessage {
    pub role: MessageRole,
    pub content: String,
}

/// One numbered context chunk frozen into an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceChunk {
    pub index: usize,
    pub source: String,
    pub chunk: String,
}

/// A sibling assistant reply attached to the user message that anchors it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseVariant {
    pub id: i64,
    pub version_index: i32,
    pub content: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_chunks: Option<Vec<SourceChunk>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub prompt_content: Option<String>,
}

/// Read-API rendering of a message, with sibling assistant alternatives
/// exposed on the user message that anchors them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_chunks: Option<Vec<SourceChunk>>,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub reply_to_message_id: Option<i64>,
    pub version_index: i32,
    pub is_archived: bool,
    pub edit_group_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_versions: Option<Vec<ResponseVariant>>,
}
