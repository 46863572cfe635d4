//! Length-aware retrieval against a real pgvector index: handcrafted
//! embeddings pin the raw cosine scores, so the boost bands decide the
//! final order exactly as documented.

mod common;

use common::TestApp;
use docuchat::models::conversation::LlmMode;
use docuchat::models::document::DocumentKind;
use docuchat::queries::documents;
use docuchat::queries::vectors::{self, VectorPoint};
use docuchat::services::vector_store;

fn unit_vector(dimension: usize, components: &[(usize, f32)]) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    for &(index, value) in components {
        vector[index] = value;
    }
    vector
}

#[tokio::test]
async fn test_length_boost_reranks_longer_chunk_above_higher_raw_score() {
    let app = TestApp::new("test_length_boost_reranks_longer_chunk").await;
    let conversation = app.create_conversation("scoring", LlmMode::Cloud).await;

    let mut conn = app.get_connection().await;
    let document = documents::insert_document(
        &mut conn,
        conversation.id,
        "scores.txt",
        None,
        DocumentKind::File,
    )
    .await
    .unwrap();

    let dimension = app.config.ai.embedding_dimension;
    let query = unit_vector(dimension, &[(0, 1.0)]);

    // Chunk A: 80 chars, cosine 0.80 against the query.
    // Chunk B: 500 chars, cosine 0.77.
    let short_content = "s".repeat(80);
    let long_content = "l".repeat(500);
    let points = vec![
        VectorPoint {
            id: vector_store::point_id(conversation.id, "scores.txt", document.id, 0, &short_content),
            source: "scores.txt".to_string(),
            chunk_index: 0,
            content: short_content,
            embedding: unit_vector(dimension, &[(0, 0.80), (1, 0.60)]),
        },
        VectorPoint {
            id: vector_store::point_id(conversation.id, "scores.txt", document.id, 1, &long_content),
            source: "scores.txt".to_string(),
            chunk_index: 1,
            content: long_content,
            embedding: unit_vector(dimension, &[(0, 0.77), (2, (1.0f32 - 0.77 * 0.77).sqrt())]),
        },
    ];
    vectors::upsert_points(&mut conn, conversation.id, document.id, &points)
        .await
        .unwrap();

    let hits = vector_store::search(&mut conn, conversation.id, &query, 2, Some(&[document.id]))
        .await
        .unwrap();

    // B wins: 0.77 + boost(500) = 0.82 beats 0.80 + boost(80) = 0.75.
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].content.chars().count(), 500);
    assert!((hits[0].raw_score - 0.77).abs() < 1e-3);
    assert!((hits[0].adjusted_score - 0.82).abs() < 1e-3);
    assert_eq!(hits[1].content.chars().count(), 80);
    assert!((hits[1].adjusted_score - 0.75).abs() < 1e-3);
    assert!(hits[0].adjusted_score >= hits[1].adjusted_score);

    // Idempotent upsert: re-indexing the same points adds no rows.
    vectors::upsert_points(&mut conn, conversation.id, document.id, &points)
        .await
        .unwrap();
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM document_vectors WHERE conversation_id = $1")
            .bind(conversation.id)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
    assert_eq!(count, 2);
}
