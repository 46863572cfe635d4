use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: i64,
    pub conversation_id: i64,
    pub front: String,
    pub back: String,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

/// A generated flashcard before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardDraft {
    pub front: String,
    pub back: String,
}

/// Recursive mind-map node with hierarchically dotted ids (e.g. `2.1.3`).
/// Models sometimes omit ids or labels; missing ids are re-derived from the
/// position during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    #[serde(default)]
    pub id: String,
    #[serde(default = "untitled_label")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<MindMapNode>>,
}

fn untitled_label() -> String {
    "Untitled".to_string()
}

/// Parsed mind-map document, before or after persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapDoc {
    pub title: String,
    pub nodes: Vec<MindMapNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MindMapRow {
    pub id: i64,
    pub conversation_id: i64,
    pub title: String,
    pub nodes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMapResponse {
    pub id: i64,
    pub conversation_id: i64,
    pub title: String,
    pub nodes: Vec<MindMapNode>,
    pub source_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MindMapResponse {
    pub fn from_row(row: MindMapRow, source_count: i64) -> Self {
        let nodes: Vec<MindMapNode> = serde_json::from_value(row.nodes).unwrap_or_default();
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            title: row.title,
            nodes,
            source_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
