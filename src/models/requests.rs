use serde::{Deserialize, Serialize};

use crate::models::conversation::{ConversationSummary, LlmMode};
use crate::models::document::DocumentView;
use crate::models::message::{ChatMessageView, ResponseVariant, SourceChunk};

/// Body of `POST /chat` and `POST /chat/stream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: i64,
    /// When true, no new user message is created; the latest user turn gets
    /// a fresh sibling assistant reply.
    #[serde(default)]
    pub regenerate: bool,
    /// Links an edited message to the original version's group
    #[serde(default)]
    pub edit_group_id: Option<i64>,
    #[serde(default)]
    pub is_edit: bool,
    /// Optional cloud model override for this turn
    #[serde(default)]
    pub cloud_model: Option<String>,
    /// Explicit parent for branching - the assistant message to chain from
    #[serde(default)]
    pub parent_message_id: Option<i64>,
}

/// Non-streaming chat response, mirroring the meta + done frame contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<String>,
    pub source_chunks: Vec<SourceChunk>,
    pub user_message: Option<ChatMessageView>,
    pub assistant_message: ChatMessageView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_versions: Option<Vec<ResponseVariant>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub conversation_id: i64,
    pub processed_files: Vec<String>,
    pub llm_mode: LlmMode,
    pub embedding_profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetailResponse {
    pub conversation: ConversationSummary,
    pub messages: Vec<ChatMessageView>,
    pub documents: Vec<DocumentView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub content: String,
    #[serde(default)]
    pub regenerate: bool,
    #[serde(default)]
    pub cloud_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageResponse {
    pub message: String,
    pub updated_message: ChatMessageView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regenerated_response: Option<ChatMessageView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteCreate {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentToggle {
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub conversation_id: i64,
    #[serde(default = "default_download_format")]
    pub format: String,
}

fn default_download_format() -> String {
    "txt".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateArtifactRequest {
    #[serde(default)]
    pub cloud_model: Option<String>,
}
