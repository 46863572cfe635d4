use crate::{DbConn, error::Result, models::document::DocumentChunk};

const CHUNK_COLUMNS: &str =
    "id, conversation_id, document_id, chunk_index, content, metadata, created_at";

pub async fn insert_chunk(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
    chunk_index: i32,
    content: &str,
    metadata: &serde_json::Value,
) -> Result<DocumentChunk> {
    let chunk = sqlx::query_as::<_, DocumentChunk>(&format!(
        r#"
        INSERT INTO document_chunks (conversation_id, document_id, chunk_index, content, metadata)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {CHUNK_COLUMNS}
        "#
    ))
    .bind(conversation_id)
    .bind(document_id)
    .bind(chunk_index)
    .bind(content)
    .bind(metadata)
    .fetch_one(conn)
    .await?;

    Ok(chunk)
}

/// All chunks of a conversation in document order, optionally restricted to
/// a set of (active) documents.
pub async fn list_chunks(
    conn: &mut DbConn,
    conversation_id: i64,
    document_ids: Option<&[i64]>,
) -> Result<Vec<DocumentChunk>> {
    let chunks = match document_ids {
        Some(ids) => {
            sqlx::query_as::<_, DocumentChunk>(&format!(
                r#"
                SELECT {CHUNK_COLUMNS} FROM document_chunks
                WHERE conversation_id = $1 AND document_id = ANY($2)
                ORDER BY document_id ASC, chunk_index ASC
                "#
            ))
            .bind(conversation_id)
            .bind(ids)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, DocumentChunk>(&format!(
                r#"
                SELECT {CHUNK_COLUMNS} FROM document_chunks
                WHERE conversation_id = $1
                ORDER BY document_id ASC, chunk_index ASC
                "#
            ))
            .bind(conversation_id)
            .fetch_all(conn)
            .await?
        }
    };

    Ok(chunks)
}

/// First `limit` chunks of the active corpus; the retrieval fallback when
/// the vector store comes back empty.
pub async fn first_chunks(
    conn: &mut DbConn,
    conversation_id: i64,
    document_ids: Option<&[i64]>,
    limit: i64,
) -> Result<Vec<DocumentChunk>> {
    let chunks = match document_ids {
        Some(ids) => {
            sqlx::query_as::<_, DocumentChunk>(&format!(
                r#"
                SELECT {CHUNK_COLUMNS} FROM document_chunks
                WHERE conversation_id = $1 AND document_id = ANY($2)
                ORDER BY document_id ASC, chunk_index ASC
                LIMIT $3
                "#
            ))
            .bind(conversation_id)
            .bind(ids)
            .bind(limit)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, DocumentChunk>(&format!(
                r#"
                SELECT {CHUNK_COLUMNS} FROM document_chunks
                WHERE conversation_id = $1
                ORDER BY document_id ASC, chunk_index ASC
                LIMIT $2
                "#
            ))
            .bind(conversation_id)
            .bind(limit)
            .fetch_all(conn)
            .await?
        }
    };

    Ok(chunks)
}

pub async fn document_has_chunks(conn: &mut DbConn, document_id: i64) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM document_chunks WHERE document_id = $1 LIMIT 1")
            .bind(document_id)
            .fetch_optional(conn)
            .await?;

    Ok(row.is_some())
}

pub async fn delete_chunks_by_document(conn: &mut DbConn, document_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
        .bind(document_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Total bytes of chunk text across the active corpus. Drives the switch to
/// hierarchical processing when a single prompt cannot hold the documents.
pub async fn total_chunk_bytes(
    conn: &mut DbConn,
    conversation_id: i64,
    document_ids: Option<&[i64]>,
) -> Result<i64> {
    let total: (Option<i64>,) = match document_ids {
        Some(ids) => {
            sqlx::query_as(
                r#"
                SELECT SUM(LENGTH(content))::BIGINT FROM document_chunks
                WHERE conversation_id = $1 AND document_id = ANY($2)
                "#,
            )
            .bind(conversation_id)
            .bind(ids)
            .fetch_one(conn)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT SUM(LENGTH(content))::BIGINT FROM document_chunks WHERE conversation_id = $1",
            )
            .bind(conversation_id)
            .fetch_one(conn)
            .await?
        }
    };

    Ok(total.0.unwrap_or(0))
}
