use serde::{Deserialize, Serialize};

use crate::models::message::SourceChunk;

/// Wire frames of the chat streaming protocol. Each frame is serialized as
/// one `data: <json>\n\n` SSE event. The first frame of a stream is always
/// `meta`, the terminal frame is always `done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SseFrame {
    Meta {
        sources: Vec<String>,
        source_chunks: Vec<SourceChunk>,
        user_message_id: Option<i64>,
        edit_group_id: Option<i64>,
    },
    Token {
        content: String,
    },
    Error {
        message: String,
    },
    Done {
        assistant_message_id: i64,
        full_response: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<bool>,
    },
}
