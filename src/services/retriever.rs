use std::sync::Arc;

use crate::{
    DbConn,
    config::RetrievalConfig,
    error::Result,
    models::conversation::LlmMode,
    models::message::BranchMessage,
    queries::{chunks, documents},
    services::chunker::Chunker,
    services::embedder::{self, Embedder},
    services::history_index::{ChatHistoryIndex, HistoryHit},
    services::vector_store::{self, ScoredChunk},
};

/// Score assigned to SQL-fallback chunks when the dense index returns
/// nothing, so the LLM is never starved of document context.
const FALLBACK_SCORE: f32 = 0.5;

const SUMMARY_KEYWORDS: [&str; 9] = [
    "summarize",
    "summary",
    "summarise",
    "brief",
    "overview",
    "gist",
    "main points",
    "key points",
    "highlights",
];

/// Case-insensitive summary-intent detection on the raw query.
pub fn is_summary_intent(query: &str) -> bool {
    let folded = query.to_lowercase();
    SUMMARY_KEYWORDS.iter().any(|kw| folded.contains(kw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    pub doc_k: usize,
    pub chat_k: usize,
    pub recent_n: usize,
}

impl RetrievalParams {
    /// Mode-dependent defaults, overridden by the summary-intent switch.
    pub fn resolve(config: &RetrievalConfig, mode: LlmMode, summary_intent: bool) -> Self {
        if summary_intent {
            return Self {
                doc_k: config.summary_doc_k,
                chat_k: 0,
                recent_n: config.summary_recent,
            };
        }
        match mode {
            LlmMode::Cloud => Self {
                doc_k: config.cloud_doc_k,
                chat_k: config.cloud_chat_k,
                recent_n: config.cloud_recent,
            },
            LlmMode::Local => Self {
                doc_k: config.local_doc_k,
                chat_k: config.local_chat_k,
                recent_n: config.local_recent,
            },
        }
    }
}

/// The ranked context bundle for one turn.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub document_chunks: Vec<ScoredChunk>,
    pub relevant_chat_history: Vec<HistoryHit>,
    pub recent_context: Vec<BranchMessage>,
    pub combined_context: String,
}

/// Fuses dense document search, past-Q/A search and a recency window into
/// one context bundle.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self { embedder, config }
    }

    pub async fn build_context(
        &self,
        conn: &mut DbConn,
        conversation_id: i64,
        query: &str,
        history: &[BranchMessage],
        params: &RetrievalParams,
    ) -> Result<RetrievedContext> {
        let query_vec =
            embedder::embed_one_blocking(self.embedder.clone(), query.to_string()).await?;

        let active_ids = documents::list_active_document_ids(conn, conversation_id).await?;

        // Chunks of inactive or deleted documents are unreachable.
        let document_chunks = if active_ids.is_empty() {
            Vec::new()
        } else {
            let hits = vector_store::search(
                conn,
                conversation_id,
                &query_vec,
                params.doc_k,
                Some(active_ids.as_slice()),
            )
            .await?;
            if hits.is_empty() {
                self.sql_fallback(conn, conversation_id, &active_ids, params.doc_k)
                    .await?
            } else {
                hits
            }
        };

        // The recency window already covers short conversations.
        let relevant_chat_history = if params.chat_k > 0 && history.len() > params.recent_n {
            let chunker = Chunker::new(
                self.config.history_chunk_size,
                self.config.history_chunk_overlap,
            );
            let embedder = self.embedder.clone();
            let history_owned = history.to_vec();
            let index = tokio::task::spawn_blocking(move || {
                ChatHistoryIndex::build(&history_owned, &chunker, &embedder)
            })
            .await
            .map_err(|e| crate::error::Error::Internal(format!("history index task failed: {e}")))?;
            index.search(&query_vec, params.chat_k)
        } else {
            Vec::new()
        };

        let recent_context: Vec<BranchMessage> = history
            .iter()
            .skip(history.len().saturating_sub(params.recent_n))
            .cloned()
            .collect();

        let combined_context = render_combined(&document_chunks, &relevant_chat_history);

        Ok(RetrievedContext {
            document_chunks,
            relevant_chat_history,
            recent_context,
            combined_context,
        })
    }

    async fn sql_fallback(
        &self,
        conn: &mut DbConn,
        conversation_id: i64,
        active_ids: &[i64],
        doc_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = chunks::first_chunks(conn, conversation_id, Some(active_ids), doc_k as i64).await?;
        tracing::debug!(
            conversation_id,
            fallback_chunks = rows.len(),
            "Vector search empty, serving SQL chunk fallback"
        );
        Ok(rows
            .into_iter()
            .map(|row| {
                let source = row
                    .metadata
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Unknown")
                    .to_string();
                ScoredChunk {
                    content: row.content,
                    source,
                    chunk_index: row.chunk_index,
                    document_id: row.document_id,
                    raw_score: FALLBACK_SCORE,
                    adjusted_score: FALLBACK_SCORE,
                }
            })
            .collect())
    }
}

/// Fixed-template auxiliary block fed to the LLM alongside the structured
/// chunks.
fn render_combined(document_chunks: &[ScoredChunk], chat_hits: &[HistoryHit]) -> String {
    let mut parts = Vec::new();

    if !document_chunks.is_empty() {
        let mut block = String::from("### Relevant Document Information:\n");
        for (i, chunk) in document_chunks.iter().enumerate() {
            block.push_str(&format!(
                "\n[Source {}: {}]\n{}\n",
                i + 1,
                chunk.source,
                chunk.content
            ));
        }
        parts.push(block);
    }

    if !chat_hits.is_empty() {
        let mut block = String::from("### Relevant Past Conversations:\n");
        let mut seen = std::collections::HashSet::new();
        for hit in chat_hits {
            if !hit.user_query.is_empty() && seen.insert(hit.user_query.clone()) {
                block.push_str(&format!("\n{}\n", hit.content));
            }
        }
        parts.push(block);
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_intent_keywords() {
        assert!(is_summary_intent("Please summarize this document"));
        assert!(is_summary_intent("give me an OVERVIEW"));
        assert!(is_summary_intent("what are the key points?"));
        assert!(!is_summary_intent("what is the third chapter about"));
    }

    #[test]
    fn test_summary_params_widen_doc_k_and_drop_chat() {
        let config = RetrievalConfig::default();
        let params = RetrievalParams::resolve(&config, LlmMode::Local, true);
        assert_eq!(params.doc_k, 20);
        assert_eq!(params.chat_k, 0);
        assert_eq!(params.recent_n, 4);
    }

    #[test]
    fn test_mode_defaults() {
        let config = RetrievalConfig::default();
        let local = RetrievalParams::resolve(&config, LlmMode::Local, false);
        assert_eq!((local.doc_k, local.chat_k, local.recent_n), (10, 2, 4));
        let cloud = RetrievalParams::resolve(&config, LlmMode::Cloud, false);
        assert_eq!((cloud.doc_k, cloud.chat_k, cloud.recent_n), (10, 3, 8));
    }

    #[test]
    fn test_combined_context_template() {
        let chunks = vec![ScoredChunk {
            content: "chunk text".to_string(),
            source: "paper.txt".to_string(),
            chunk_index: 0,
            document_id: Some(1),
            raw_score: 0.9,
            adjusted_score: 0.9,
        }];
        let hits = vec![HistoryHit {
            content: "User asked: x\n\nAssistant answered: y".to_string(),
            user_query: "x".to_string(),
            score: 0.5,
        }];
        let rendered = render_combined(&chunks, &hits);
        assert!(rendered.contains("### Relevant Document Information:"));
        assert!(rendered.contains("[Source 1: paper.txt]"));
        assert!(rendered.contains("### Relevant Past Conversations:"));
    }

    #[test]
    fn test_combined_context_dedupes_chat_hits() {
        let hits = vec![
            HistoryHit {
                content: "first".to_string(),
                user_query: "same question".to_string(),
                score: 0.9,
            },
            HistoryHit {
                content: "second".to_string(),
                user_query: "same question".to_string(),
                score: 0.8,
            },
        ];
        let rendered = render_combined(&[], &hits);
        assert!(rendered.contains("first"));
        assert!(!rendered.contains("second"));
    }
}
