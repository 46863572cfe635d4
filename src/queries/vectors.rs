use pgvector::Vector;
use uuid::Uuid;

use crate::{DbConn, error::Result};

/// One point to upsert into the dense index.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: Uuid,
    pub source: String,
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Raw similarity hit before length-aware rescoring.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VectorHit {
    pub content: String,
    pub source: String,
    pub chunk_index: i32,
    pub document_id: i64,
    pub raw_score: f64,
}

/// Idempotent insert keyed on the deterministic point id.
pub async fn upsert_points(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
    points: &[VectorPoint],
) -> Result<u64> {
    let mut written = 0;
    for point in points {
        let result = sqlx::query(
            r#"
            INSERT INTO document_vectors
                (id, conversation_id, document_id, source, chunk_index, content,
                 embedding, content_length)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                content = EXCLUDED.content,
                embedding = EXCLUDED.embedding,
                content_length = EXCLUDED.content_length
            "#,
        )
        .bind(point.id)
        .bind(conversation_id)
        .bind(document_id)
        .bind(&point.source)
        .bind(point.chunk_index)
        .bind(&point.content)
        .bind(Vector::from(point.embedding.clone()))
        .bind(point.content.chars().count() as i32)
        .execute(&mut *conn)
        .await?;
        written += result.rows_affected();
    }

    Ok(written)
}

/// Cosine similarity search scoped to one conversation, optionally filtered
/// to a set of documents. Results come back ordered by raw similarity; the
/// caller applies the length boost and re-sorts.
pub async fn search(
    conn: &mut DbConn,
    conversation_id: i64,
    query: &[f32],
    limit: i64,
    document_ids: Option<&[i64]>,
) -> Result<Vec<VectorHit>> {
    let query_vec = Vector::from(query.to_vec());

    let hits = match document_ids {
        Some(ids) => {
            sqlx::query_as::<_, VectorHit>(
                r#"
                SELECT content, source, chunk_index, document_id,
                       1 - (embedding <=> $2) AS raw_score
                FROM document_vectors
                WHERE conversation_id = $1 AND document_id = ANY($4)
                ORDER BY embedding <=> $2, chunk_index ASC
                LIMIT $3
                "#,
            )
            .bind(conversation_id)
            .bind(query_vec)
            .bind(limit)
            .bind(ids)
            .fetch_all(conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, VectorHit>(
                r#"
                SELECT content, source, chunk_index, document_id,
                       1 - (embedding <=> $2) AS raw_score
                FROM document_vectors
                WHERE conversation_id = $1
                ORDER BY embedding <=> $2, chunk_index ASC
                LIMIT $3
                "#,
            )
            .bind(conversation_id)
            .bind(query_vec)
            .bind(limit)
            .fetch_all(conn)
            .await?
        }
    };

    Ok(hits)
}

/// Mass delete by document filter; returns rows affected as the operation id.
pub async fn delete_by_document(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
) -> Result<u64> {
    let result =
        sqlx::query("DELETE FROM document_vectors WHERE conversation_id = $1 AND document_id = $2")
            .bind(conversation_id)
            .bind(document_id)
            .execute(conn)
            .await?;

    Ok(result.rows_affected())
}

/// Mass delete by conversation filter; returns rows affected.
pub async fn delete_by_conversation(conn: &mut DbConn, conversation_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM document_vectors WHERE conversation_id = $1")
        .bind(conversation_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
