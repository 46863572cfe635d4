use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DocumentKind {
    File,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub conversation_id: i64,
    pub filename: String,
    pub content: Option<String>,
    pub doc_kind: DocumentKind,
    /// Inactive documents are hidden from retrieval but keep their chunks.
    pub is_active: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub conversation_id: i64,
    pub document_id: Option<i64>,
    pub chunk_index: i32,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Stable metadata attached to every indexed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Decoder-emitted source tag (filename or `filename_page_N`)
    pub source: String,
    pub chunk_index: usize,
    pub chunk_id: usize,
}

/// Detail-view projection of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: i64,
    pub filename: String,
    pub content: Option<String>,
    pub doc_kind: DocumentKind,
    pub is_active: bool,
    pub has_embeddings: bool,
    pub uploaded_at: DateTime<Utc>,
}
