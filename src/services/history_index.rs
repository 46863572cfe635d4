use std::sync::Arc;

use crate::models::message::{BranchMessage, MessageRole};
use crate::services::chunker::Chunker;
use crate::services::embedder::Embedder;

/// Guard against divide-by-zero on empty embeddings.
const NORM_EPSILON: f32 = 1e-8;

/// Assistant replies are truncated to this length inside a Q/A unit.
const ANSWER_PREVIEW_CHARS: usize = 500;

/// User queries are identified by this prefix for deduplication.
const QUERY_PREFIX_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct HistoryHit {
    pub content: String,
    pub user_query: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    content: String,
    user_query: String,
    embedding: Vec<f32>,
}

/// In-memory index over past Q/A pairs of the active branch, rebuilt per
/// request. Each user message is paired with the assistant reply that
/// follows it, chunked small, and embedded with the conversation's profile.
pub struct ChatHistoryIndex {
    entries: Vec<HistoryEntry>,
}

impl ChatHistoryIndex {
    pub fn build(
        history: &[BranchMessage],
        chunker: &Chunker,
        embedder: &Arc<dyn Embedder>,
    ) -> Self {
        let mut texts = Vec::new();
        let mut queries = Vec::new();

        let mut i = 0;
        while i < history.len() {
            let message = &history[i];
            if message.role == MessageRole::User {
                let user_content = &message.content;
                let mut answer = String::new();
                if let Some(next) = history.get(i + 1)
                    && next.role == MessageRole::Assistant
                {
                    answer = next.content.chars().take(ANSWER_PREVIEW_CHARS).collect();
                    i += 1;
                }

                let unit = format!("User asked: {user_content}\n\nAssistant answered: {answer}");
                let query_prefix: String = user_content.chars().take(QUERY_PREFIX_CHARS).collect();
                for chunk in chunker.split(&unit) {
                    texts.push(chunk);
                    queries.push(query_prefix.clone());
                }
            }
            i += 1;
        }

        let embeddings = embedder.embed_batch(&texts);
        let entries = texts
            .into_iter()
            .zip(queries)
            .zip(embeddings)
            .map(|((content, user_query), embedding)| HistoryEntry {
                content,
                user_query,
                embedding,
            })
            .collect();

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k units by cosine similarity, deduplicated by the originating
    /// user query before exposure.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<HistoryHit> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &HistoryEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine(query_vec, &entry.embedding), entry))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen = std::collections::HashSet::new();
        let mut hits = Vec::new();
        for (score, entry) in scored {
            if hits.len() >= k {
                break;
            }
            if seen.insert(entry.user_query.clone()) {
                hits.push(HistoryHit {
                    content: entry.content.clone(),
                    user_query: entry.user_query.clone(),
                    score,
                });
            }
        }
        hits
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (norm_a * norm_b + NORM_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedder::HashingEmbedder;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(HashingEmbedder::new("custom", 256))
    }

    fn msg(role: MessageRole, content: &str) -> BranchMessage {
        BranchMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_pairs_user_with_following_assistant() {
        let history = vec![
            msg(MessageRole::User, "what is rust"),
            msg(MessageRole::Assistant, "a systems programming language"),
            msg(MessageRole::User, "who created it"),
            msg(MessageRole::Assistant, "graydon hoare at mozilla"),
        ];
        let index = ChatHistoryIndex::build(&history, &Chunker::new(300, 50), &embedder());
        assert!(!index.is_empty());

        let query = embedder().embed("who created it");
        let hits = index.search(&query, 2);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].user_query, "who created it");
    }

    #[test]
    fn test_search_dedupes_by_user_query() {
        // A long answer splits into multiple chunks of the same unit; only
        // one hit per originating query may surface.
        let long_answer = "rust ownership borrowing lifetimes ".repeat(30);
        let history = vec![
            msg(MessageRole::User, "explain rust ownership"),
            msg(MessageRole::Assistant, &long_answer),
        ];
        let index = ChatHistoryIndex::build(&history, &Chunker::new(300, 50), &embedder());

        let query = embedder().embed("rust ownership");
        let hits = index.search(&query, 5);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_search_caps_at_k() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(msg(MessageRole::User, &format!("question number {i}")));
            history.push(msg(MessageRole::Assistant, &format!("answer number {i}")));
        }
        let index = ChatHistoryIndex::build(&history, &Chunker::new(300, 50), &embedder());
        let query = embedder().embed("question");
        let hits = index.search(&query, 3);
        assert_eq!(hits.len(), 3);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[test]
    fn test_empty_embeddings_do_not_divide_by_zero() {
        let history = vec![msg(MessageRole::User, "???"), msg(MessageRole::Assistant, "!!!")];
        let index = ChatHistoryIndex::build(&history, &Chunker::new(300, 50), &embedder());
        let hits = index.search(&vec![0.0; 256], 2);
        for hit in hits {
            assert!(hit.score.is_finite());
        }
    }

    #[test]
    fn test_user_without_assistant_still_indexed() {
        let history = vec![msg(MessageRole::User, "an unanswered question about turtles")];
        let index = ChatHistoryIndex::build(&history, &Chunker::new(300, 50), &embedder());
        assert!(!index.is_empty());
    }
}
