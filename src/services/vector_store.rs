use uuid::Uuid;

use crate::{
    DbConn,
    error::Result,
    queries::vectors::{self, VectorPoint},
    services::chunker::TextChunk,
};

/// A retrieval hit after length-aware rescoring.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub content: String,
    pub source: String,
    pub chunk_index: i32,
    pub document_id: Option<i64>,
    pub raw_score: f32,
    pub adjusted_score: f32,
}

/// Additive adjustment to cosine similarity by content length. Short
/// index-like chunks otherwise outrank detailed paragraphs.
pub fn length_boost(content_chars: usize) -> f32 {
    match content_chars {
        0..=99 => -0.05,
        100..=199 => 0.0,
        200..=399 => 0.03,
        _ => (content_chars as f32 / 10_000.0).min(0.08),
    }
}

/// Deterministic point id so re-indexing the same chunk upserts instead of
/// duplicating.
pub fn point_id(
    conversation_id: i64,
    source: &str,
    document_id: i64,
    chunk_index: usize,
    content: &str,
) -> Uuid {
    let prefix: String = content.chars().take(100).collect();
    let name = format!("{conversation_id}:{source}:{document_id}:{chunk_index}:{prefix}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

/// Indexes chunk embeddings for one document. Idempotent under retry.
pub async fn index_chunks(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
    chunks: &[TextChunk],
    embeddings: Vec<Vec<f32>>,
) -> Result<u64> {
    let points: Vec<VectorPoint> = chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| VectorPoint {
            id: point_id(
                conversation_id,
                &chunk.metadata.source,
                document_id,
                chunk.metadata.chunk_index,
                &chunk.content,
            ),
            source: chunk.metadata.source.clone(),
            chunk_index: chunk.metadata.chunk_index as i32,
            content: chunk.content.clone(),
            embedding,
        })
        .collect();

    vectors::upsert_points(conn, conversation_id, document_id, &points).await
}

/// Tenant-filtered cosine search with length-aware rescoring. Ties on the
/// adjusted score keep insertion order, so the lower chunk index wins.
pub async fn search(
    conn: &mut DbConn,
    conversation_id: i64,
    query: &[f32],
    k: usize,
    active_doc_ids: Option<&[i64]>,
) -> Result<Vec<ScoredChunk>> {
    let hits = vectors::search(conn, conversation_id, query, k as i64, active_doc_ids).await?;

    let mut scored: Vec<ScoredChunk> = hits
        .into_iter()
        .map(|hit| {
            let raw = hit.raw_score as f32;
            let adjusted = raw + length_boost(hit.content.chars().count());
            ScoredChunk {
                content: hit.content,
                source: hit.source,
                chunk_index: hit.chunk_index,
                document_id: Some(hit.document_id),
                raw_score: raw,
                adjusted_score: adjusted,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.adjusted_score
            .partial_cmp(&a.adjusted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(scored)
}

pub async fn delete_by_document(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
) -> Result<u64> {
    vectors::delete_by_document(conn, conversation_id, document_id).await
}

pub async fn delete_by_conversation(conn: &mut DbConn, conversation_id: i64) -> Result<u64> {
    vectors::delete_by_conversation(conn, conversation_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boost_bands() {
        assert_eq!(length_boost(0), -0.05);
        assert_eq!(length_boost(99), -0.05);
        assert_eq!(length_boost(100), 0.0);
        assert_eq!(length_boost(199), 0.0);
        assert_eq!(length_boost(200), 0.03);
        assert_eq!(length_boost(399), 0.03);
        assert!((length_boost(500) - 0.05).abs() < 1e-6);
        assert_eq!(length_boost(100_000), 0.08);
    }

    #[test]
    fn test_boost_is_monotone_above_400() {
        assert!(length_boost(500) < length_boost(700));
        assert!(length_boost(700) <= length_boost(900));
    }

    #[test]
    fn test_longer_chunk_outranks_short_one_despite_lower_raw_score() {
        // A: 80 chars, raw 0.80 -> adjusted 0.75. B: 500 chars, raw 0.77 -> ~0.82.
        let a_adjusted = 0.80 + length_boost(80);
        let b_adjusted = 0.77 + length_boost(500);
        assert!(b_adjusted > a_adjusted);
    }

    #[test]
    fn test_point_id_is_stable_and_content_sensitive() {
        let a = point_id(1, "doc.txt", 2, 0, "the content of the chunk");
        let b = point_id(1, "doc.txt", 2, 0, "the content of the chunk");
        let c = point_id(1, "doc.txt", 2, 0, "different content entirely");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_point_id_prefix_is_char_safe() {
        // Multi-byte characters near the 100-char boundary must not panic.
        let content = "ü".repeat(150);
        let id = point_id(7, "notes.md", 3, 4, &content);
        assert_eq!(id, point_id(7, "notes.md", 3, 4, &content));
    }
}
