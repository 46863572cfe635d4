use crate::{
    DbConn,
    error::Result,
    models::message::{ChatMessage, MessageRole},
};

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, sources, source_chunks, \
     prompt_snapshot, reply_to_message_id, edit_group_id, version_index, is_edited, is_archived, \
     created_at, updated_at";

/// Insert payload for a user message.
#[derive(Debug, Clone)]
pub struct NewUserMessage<'a> {
    pub conversation_id: i64,
    pub content: &'a str,
    pub reply_to_message_id: Option<i64>,
    pub edit_group_id: Option<i64>,
    pub version_index: i32,
    pub is_edited: bool,
}

/// Insert payload for an assistant message with its frozen retrieval
/// fingerprint.
#[derive(Debug, Clone)]
pub struct NewAssistantMessage<'a> {
    pub conversation_id: i64,
    pub content: &'a str,
    pub reply_to_message_id: Option<i64>,
    pub sources: serde_json::Value,
    pub source_chunks: serde_json::Value,
    pub prompt_snapshot: &'a str,
}

pub async fn insert_user_message(
    conn: &mut DbConn,
    new_msg: NewUserMessage<'_>,
) -> Result<ChatMessage> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        r#"
        INSERT INTO chat_messages
            (conversation_id, role, content, reply_to_message_id, edit_group_id,
             version_index, is_edited)
        VALUES ($1, 'user', $2, $3, $4, $5, $6)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(new_msg.conversation_id)
    .bind(new_msg.content)
    .bind(new_msg.reply_to_message_id)
    .bind(new_msg.edit_group_id)
    .bind(new_msg.version_index)
    .bind(new_msg.is_edited)
    .fetch_one(conn)
    .await?;

    Ok(msg)
}

pub async fn insert_assistant_message(
    conn: &mut DbConn,
    new_msg: NewAssistantMessage<'_>,
) -> Result<ChatMessage> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        r#"
        INSERT INTO chat_messages
            (conversation_id, role, content, reply_to_message_id, sources,
             source_chunks, prompt_snapshot, version_index, is_archived)
        VALUES ($1, 'assistant', $2, $3, $4, $5, $6, 1, FALSE)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(new_msg.conversation_id)
    .bind(new_msg.content)
    .bind(new_msg.reply_to_message_id)
    .bind(new_msg.sources)
    .bind(new_msg.source_chunks)
    .bind(new_msg.prompt_snapshot)
    .fetch_one(conn)
    .await?;

    Ok(msg)
}

/// Back-fills `edit_group_id = id` on a first-version user message.
pub async fn set_edit_group_to_self(conn: &mut DbConn, message_id: i64) -> Result<ChatMessage> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        r#"
        UPDATE chat_messages SET edit_group_id = id, updated_at = NOW()
        WHERE id = $1
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(message_id)
    .fetch_one(conn)
    .await?;

    Ok(msg)
}

pub async fn get_message(conn: &mut DbConn, message_id: i64) -> Result<Option<ChatMessage>> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1"
    ))
    .bind(message_id)
    .fetch_optional(conn)
    .await?;

    Ok(msg)
}

pub async fn get_message_in_conversation(
    conn: &mut DbConn,
    conversation_id: i64,
    message_id: i64,
) -> Result<Option<ChatMessage>> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1 AND conversation_id = $2"
    ))
    .bind(message_id)
    .bind(conversation_id)
    .fetch_optional(conn)
    .await?;

    Ok(msg)
}

/// All messages of a conversation in id (creation) order.
pub async fn list_messages(conn: &mut DbConn, conversation_id: i64) -> Result<Vec<ChatMessage>> {
    let messages = sqlx::query_as::<_, ChatMessage>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE conversation_id = $1 ORDER BY id ASC"
    ))
    .bind(conversation_id)
    .fetch_all(conn)
    .await?;

    Ok(messages)
}

/// Latest message of a conversation, by id.
pub async fn latest_message(
    conn: &mut DbConn,
    conversation_id: i64,
) -> Result<Option<ChatMessage>> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        r#"
        SELECT {MESSAGE_COLUMNS} FROM chat_messages
        WHERE conversation_id = $1
        ORDER BY id DESC LIMIT 1
        "#
    ))
    .bind(conversation_id)
    .fetch_optional(conn)
    .await?;

    Ok(msg)
}

/// Latest message of a given role, by id.
pub async fn latest_message_of_role(
    conn: &mut DbConn,
    conversation_id: i64,
    role: MessageRole,
) -> Result<Option<ChatMessage>> {
    let msg = sqlx::query_as::<_, ChatMessage>(&format!(
        r#"
        SELECT {MESSAGE_COLUMNS} FROM chat_messages
        WHERE conversation_id = $1 AND role = $2
        ORDER BY id DESC LIMIT 1
        "#
    ))
    .bind(conversation_id)
    .bind(role)
    .fetch_optional(conn)
    .await?;

    Ok(msg)
}

pub async fn has_assistant_message(conn: &mut DbConn, conversation_id: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM chat_messages WHERE conversation_id = $1 AND role = 'assistant' LIMIT 1",
    )
    .bind(conversation_id)
    .fetch_optional(conn)
    .await?;

    Ok(row.is_some())
}

/// Number of user-message versions already in an edit group.
pub async fn count_edit_group_members(
    conn: &mut DbConn,
    conversation_id: i64,
    edit_group_id: i64,
) -> Result<i64> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM chat_messages
        WHERE conversation_id = $1 AND role = 'user' AND edit_group_id = $2
        "#,
    )
    .bind(conversation_id)
    .bind(edit_group_id)
    .fetch_one(conn)
    .await?;

    Ok(count.0)
}

pub async fn delete_message(conn: &mut DbConn, message_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM chat_messages WHERE id = $1")
        .bind(message_id)
        .execute(conn)
        .await?;

    Ok(())
}
