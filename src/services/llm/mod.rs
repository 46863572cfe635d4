pub mod cloud;
pub mod local;
pub mod prompt;
pub mod router;
pub mod sanitize;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::message::{BranchMessage, SourceChunk};
use crate::services::vector_store::ScoredChunk;

/// Bounded queue between the stream producer and the SSE consumer.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Chunk text frozen into `source_chunks` is capped at this many chars.
const SOURCE_CHUNK_PREVIEW_CHARS: usize = 800;

/// One numbered context document handed to a provider. Citation numbers in
/// the response refer to the 1-based order of these.
#[derive(Debug, Clone)]
pub struct ContextDoc {
    pub source: String,
    pub content: String,
}

impl From<&ScoredChunk> for ContextDoc {
    fn from(chunk: &ScoredChunk) -> Self {
        Self {
            source: chunk.source.clone(),
            content: chunk.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOutput {
    pub response: String,
    pub sources: Vec<String>,
    pub source_chunks: Vec<SourceChunk>,
}

/// Tokens arrive in generation order; the channel closing is the completion
/// sentinel.
pub type TokenReceiver = mpsc::Receiver<Result<String>>;

/// Uniform provider contract over cloud and local model families. All
/// operations return plain UTF-8 text; there is no tool use.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `generate_stream` is implemented natively. Callers simulate
    /// streaming by whitespace-splitting `generate` output otherwise.
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        query: &str,
        context_docs: &[ContextDoc],
        recent: &[BranchMessage],
        aux_context: &str,
    ) -> Result<GenerateOutput>;

    async fn generate_stream(
        &self,
        _query: &str,
        _context_docs: &[ContextDoc],
        _recent: &[BranchMessage],
        _aux_context: &str,
    ) -> Result<TokenReceiver> {
        Err(Error::Provider(format!(
            "{} does not support streaming",
            self.name()
        )))
    }

    /// Bare prompt-in, text-out call used by artifact generation.
    async fn generate_simple(&self, prompt: &str) -> Result<String>;
}

/// Distinct sources in first-seen order.
pub fn extract_sources(context_docs: &[ContextDoc]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    context_docs
        .iter()
        .filter(|d| seen.insert(d.source.clone()))
        .map(|d| d.source.clone())
        .collect()
}

/// The numbered chunk previews frozen into the assistant record, matching
/// the citation numbering of the prompt.
pub fn extract_source_chunks(context_docs: &[ContextDoc]) -> Vec<SourceChunk> {
    context_docs
        .iter()
        .enumerate()
        .filter(|(_, d)| !d.content.is_empty())
        .map(|(i, d)| SourceChunk {
            index: i + 1,
            source: d.source.clone(),
            chunk: d.content.chars().take(SOURCE_CHUNK_PREVIEW_CHARS).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, content: &str) -> ContextDoc {
        ContextDoc {
            source: source.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_sources_deduplicate_preserving_order() {
        let docs = vec![
            doc("b.txt", "1"),
            doc("a.txt", "2"),
            doc("b.txt", "3"),
        ];
        assert_eq!(extract_sources(&docs), vec!["b.txt", "a.txt"]);
    }

    #[test]
    fn test_source_chunks_are_one_based_and_capped() {
        let long = "x".repeat(1000);
        let docs = vec![doc("a.txt", &long), doc("b.txt", "short")];
        let chunks = extract_source_chunks(&docs);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[0].chunk.chars().count(), 800);
        assert_eq!(chunks[1].index, 2);
    }

    #[test]
    fn test_empty_content_is_skipped() {
        let docs = vec![doc("a.txt", ""), doc("b.txt", "kept")];
        let chunks = extract_source_chunks(&docs);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, "b.txt");
    }
}
