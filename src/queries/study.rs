use crate::{
    DbConn,
    error::Result,
    models::study::{Flashcard, MindMapRow},
};

const FLASHCARD_COLUMNS: &str = "id, conversation_id, front, back, order_index, created_at";
const MINDMAP_COLUMNS: &str = "id, conversation_id, title, nodes, created_at, updated_at";

pub async fn list_flashcards(conn: &mut DbConn, conversation_id: i64) -> Result<Vec<Flashcard>> {
    let cards = sqlx::query_as::<_, Flashcard>(&format!(
        r#"
        SELECT {FLASHCARD_COLUMNS} FROM flashcards
        WHERE conversation_id = $1
        ORDER BY order_index ASC
        "#
    ))
    .bind(conversation_id)
    .fetch_all(conn)
    .await?;

    Ok(cards)
}

/// Fronts of existing cards; passed to generation as negative examples.
pub async fn list_flashcard_fronts(conn: &mut DbConn, conversation_id: i64) -> Result<Vec<String>> {
    let fronts: Vec<(String,)> = sqlx::query_as(
        "SELECT front FROM flashcards WHERE conversation_id = $1 ORDER BY order_index ASC",
    )
    .bind(conversation_id)
    .fetch_all(conn)
    .await?;

    Ok(fronts.into_iter().map(|(front,)| front).collect())
}

pub async fn insert_flashcard(
    conn: &mut DbConn,
    conversation_id: i64,
    front: &str,
    back: &str,
    order_index: i32,
) -> Result<Flashcard> {
    let card = sqlx::query_as::<_, Flashcard>(&format!(
        r#"
        INSERT INTO flashcards (conversation_id, front, back, order_index)
        VALUES ($1, $2, $3, $4)
        RETURNING {FLASHCARD_COLUMNS}
        "#
    ))
    .bind(conversation_id)
    .bind(front)
    .bind(back)
    .bind(order_index)
    .fetch_one(conn)
    .await?;

    Ok(card)
}

pub async fn delete_flashcard(
    conn: &mut DbConn,
    conversation_id: i64,
    flashcard_id: i64,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM flashcards WHERE id = $1 AND conversation_id = $2")
        .bind(flashcard_id)
        .bind(conversation_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

pub async fn delete_all_flashcards(conn: &mut DbConn, conversation_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM flashcards WHERE conversation_id = $1")
        .bind(conversation_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

pub async fn get_mindmap(conn: &mut DbConn, conversation_id: i64) -> Result<Option<MindMapRow>> {
    let mindmap = sqlx::query_as::<_, MindMapRow>(&format!(
        "SELECT {MINDMAP_COLUMNS} FROM mindmaps WHERE conversation_id = $1"
    ))
    .bind(conversation_id)
    .fetch_optional(conn)
    .await?;

    Ok(mindmap)
}

/// At most one mind map per conversation: regeneration replaces in place.
pub async fn upsert_mindmap(
    conn: &mut DbConn,
    conversation_id: i64,
    title: &str,
    nodes: &serde_json::Value,
) -> Result<MindMapRow> {
    let mindmap = sqlx::query_as::<_, MindMapRow>(&format!(
        r#"
        INSERT INTO mindmaps (conversation_id, title, nodes)
        VALUES ($1, $2, $3)
        ON CONFLICT (conversation_id)
        DO UPDATE SET title = EXCLUDED.title, nodes = EXCLUDED.nodes, updated_at = NOW()
        RETURNING {MINDMAP_COLUMNS}
        "#
    ))
    .bind(conversation_id)
    .bind(title)
    .bind(nodes)
    .fetch_one(conn)
    .await?;

    Ok(mindmap)
}

pub async fn delete_mindmap(conn: &mut DbConn, conversation_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM mindmaps WHERE conversation_id = $1")
        .bind(conversation_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
