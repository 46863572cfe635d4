use crate::{
    DbConn,
    error::Result,
    models::conversation::{Conversation, LlmMode},
};

/// Inserts a new conversation owned by `user_id`.
pub async fn insert_conversation(
    conn: &mut DbConn,
    user_id: i64,
    title: &str,
    llm_mode: LlmMode,
    embedding_profile: &str,
) -> Result<Conversation> {
    let conversation = sqlx::query_as::<_, Conversation>(
        r#"
        INSERT INTO conversations (user_id, title, llm_mode, embedding_profile)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, title, llm_mode, embedding_profile, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(title)
    .bind(llm_mode)
    .bind(embedding_profile)
    .fetch_one(conn)
    .await?;

    Ok(conversation)
}

/// Fetches a conversation scoped to its owner. Returns None when the
/// conversation does not exist or belongs to someone else.
pub async fn get_conversation_for_user(
    conn: &mut DbConn,
    conversation_id: i64,
    user_id: i64,
) -> Result<Option<Conversation>> {
    let conversation = sqlx::query_as::<_, Conversation>(
        r#"
        SELECT id, user_id, title, llm_mode, embedding_profile, created_at, updated_at
        FROM conversations
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?;

    Ok(conversation)
}

/// Lists a user's conversations, most recently touched first.
pub async fn list_conversations(conn: &mut DbConn, user_id: i64) -> Result<Vec<Conversation>> {
    let conversations = sqlx::query_as::<_, Conversation>(
        r#"
        SELECT id, user_id, title, llm_mode, embedding_profile, created_at, updated_at
        FROM conversations
        WHERE user_id = $1
        ORDER BY updated_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;

    Ok(conversations)
}

/// Bumps `updated_at`. Runs inside the same transaction as the write that
/// caused it so the timestamp stays monotone per conversation.
pub async fn touch_conversation(conn: &mut DbConn, conversation_id: i64) -> Result<()> {
    sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
        .bind(conversation_id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Deletes a conversation; owned rows cascade via foreign keys.
pub async fn delete_conversation(conn: &mut DbConn, conversation_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM conversations WHERE id = $1")
        .bind(conversation_id)
        .execute(conn)
        .await?;

    Ok(())
}
