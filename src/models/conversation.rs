use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Which provider family answers for a conversation. Fixed at creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LlmMode {
    Cloud,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub llm_mode: LlmMode,
    /// Opaque embedding profile tag, immutable for the conversation's lifetime
    pub embedding_profile: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// List-view projection: conversation plus a preview of the latest message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
    pub llm_mode: LlmMode,
    pub embedding_profile: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message: Option<String>,
}

impl ConversationSummary {
    pub fn from_conversation(conversation: Conversation, last_message: Option<String>) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            llm_mode: conversation.llm_mode,
            embedding_profile: conversation.embedding_profile,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            last_message,
        }
    }
}
