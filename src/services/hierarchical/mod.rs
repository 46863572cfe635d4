//! Batch-then-merge generation for corpora too large for a single prompt:
//! stratified chunk sampling, per-batch LLM calls, and a merge step for
//! summaries, flashcards, and mind maps.

pub mod parse;

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;

use crate::error::{Error, Result};
use crate::models::study::{FlashcardDraft, MindMapDoc, MindMapNode};
use crate::services::llm::LlmProvider;

/// Chunks considered per artifact generation run.
pub const SELECTION_TARGET: usize = 30;

/// Local-mode batches are capped at this many chunks per prompt.
const BATCH_SIZE: usize = 6;

/// A chunk's text plus its source tag, detached from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledChunk {
    pub source: String,
    pub content: String,
}

/// Stratified chunk selection: head and tail anchor the sample so
/// introductions and conclusions are always covered, the middle is a
/// seeded uniform sample. Deterministic given `(len, target, seed)`.
pub fn select_stratified(chunks: &[SampledChunk], target: usize, seed: u64) -> Vec<SampledChunk> {
    let n = chunks.len();
    if n <= target {
        return chunks.to_vec();
    }

    let head = (target / 10).max(1).min(n / 3);
    let tail = (target / 10).max(1).min(n / 3);
    let middle_pool = &chunks[head..n - tail];
    let middle_count = target
        .saturating_sub(head + tail)
        .min(middle_pool.len());

    let mut selected: Vec<SampledChunk> = Vec::with_capacity(target);
    selected.extend_from_slice(&chunks[..head]);
    selected.extend_from_slice(&chunks[n - tail..]);

    if middle_count > 0 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> = sample(&mut rng, middle_pool.len(), middle_count).into_vec();
        indices.sort_unstable();
        selected.extend(indices.into_iter().map(|i| middle_pool[i].clone()));
    }

    selected
}

fn batches(chunks: &[SampledChunk]) -> Vec<&[SampledChunk]> {
    chunks.chunks(BATCH_SIZE).collect()
}

fn join_contents(chunks: &[SampledChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// --- Summaries ---

fn summary_prompt(context: &str) -> String {
    format!(
        "Provide a comprehensive summary of the following document content:\n\n{context}\n\n\
         Create a detailed summary covering all major topics, key points, and important details."
    )
}

fn batch_summary_prompt(context: &str) -> String {
    format!(
        "Summarize the following document section:\n\n{context}\n\n\
         Provide a concise summary of key points and main ideas."
    )
}

fn merge_summary_prompt(partials: &str) -> String {
    format!(
        "Combine these partial summaries into one comprehensive summary:\n\n{partials}\n\n\
         Create a unified, well-structured summary covering all major topics."
    )
}

/// Hierarchical summarization. Local mode with more than one batch of
/// selected chunks summarizes per batch and merges; cloud mode is a single
/// shot over the full selection.
pub async fn summarize(
    provider: &Arc<dyn LlmProvider>,
    chunks: &[SampledChunk],
    local: bool,
    seed: u64,
) -> Result<String> {
    let selected = select_stratified(chunks, SELECTION_TARGET, seed);
    tracing::info!(
        selected = selected.len(),
        total = chunks.len(),
        local,
        "Generating hierarchical summary"
    );

    if local && selected.len() > BATCH_SIZE {
        let parts = batches(&selected);
        let mut partials = Vec::new();
        for (i, batch) in parts.iter().enumerate() {
            tracing::debug!(batch = i + 1, batches = parts.len(), "Summarizing batch");
            let response = provider
                .generate_simple(&batch_summary_prompt(&join_contents(batch)))
                .await?;
            if !response.trim().is_empty() {
                partials.push(response.trim().to_string());
            }
        }
        if partials.is_empty() {
            return Err(Error::Provider(
                "no partial summaries were produced".to_string(),
            ));
        }
        provider
            .generate_simple(&merge_summary_prompt(&partials.join("\n\n")))
            .await
    } else {
        provider
            .generate_simple(&summary_prompt(&join_contents(&selected)))
            .await
    }
}

// --- Flashcards ---

fn flashcard_prompt(context: &str, count: usize, existing: &[String]) -> String {
    let existing_instruction = if existing.is_empty() {
        String::new()
    } else {
        let mut preview = existing
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if existing.len() > 5 {
            preview.push_str(&format!("... ({} total)", existing.len()));
        }
        format!("AVOID duplicating these existing questions: {preview}\n\n")
    };

    format!(
        "Based on the following document content, generate {count} flashcards.\n\
         Each flashcard should have a \"front\" (question, max 50 characters) and \"back\" (answer, max 25 words).\n\n\
         RULES:\n\
         - NO citations, references, or numbers like [1], [2]\n\
         - Plain text only, no markdown\n\
         - Keep answers SHORT (under 25 words)\n\n\
         {existing_instruction}\
         IMPORTANT: Respond ONLY with valid JSON:\n\
         [\n    {{\"front\": \"Question 1?\", \"back\": \"Answer 1\"}},\n    {{\"front\": \"Question 2?\", \"back\": \"Answer 2\"}}\n]\n\n\
         Document Content:\n{context}\n\n\
         Generate the flashcards."
    )
}

/// Removes duplicate cards by lowercased front, preserving insertion order
/// and capping at `target`.
pub fn dedupe_flashcards(cards: Vec<FlashcardDraft>, target: usize) -> Vec<FlashcardDraft> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for card in cards {
        let key = card.front.trim().to_lowercase();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        unique.push(card);
        if unique.len() >= target {
            break;
        }
    }
    unique
}

/// Batched flashcard generation with deduplication against both this run
/// and previously persisted fronts.
pub async fn generate_flashcards(
    provider: &Arc<dyn LlmProvider>,
    chunks: &[SampledChunk],
    target: usize,
    local: bool,
    existing_fronts: &[String],
    seed: u64,
) -> Result<Vec<FlashcardDraft>> {
    let selected = select_stratified(chunks, SELECTION_TARGET, seed);
    tracing::info!(
        selected = selected.len(),
        total = chunks.len(),
        avoiding = existing_fronts.len(),
        local,
        "Generating flashcards"
    );

    let drafts = if local && selected.len() > BATCH_SIZE {
        let parts = batches(&selected);
        let per_batch = (target / parts.len()).max(3);
        let mut all = Vec::new();
        for (i, batch) in parts.iter().enumerate() {
            tracing::debug!(batch = i + 1, batches = parts.len(), "Flashcard batch");
            let response = provider
                .generate_simple(&flashcard_prompt(
                    &join_contents(batch),
                    per_batch,
                    existing_fronts,
                ))
                .await?;
            all.extend(parse::parse_flashcards(&response));
        }
        all
    } else {
        let response = provider
            .generate_simple(&flashcard_prompt(
                &join_contents(&selected),
                target,
                existing_fronts,
            ))
            .await?;
        parse::parse_flashcards(&response)
    };

    if drafts.is_empty() {
        return Err(Error::Provider(
            "failed to parse flashcard response from the model".to_string(),
        ));
    }

    Ok(dedupe_flashcards(drafts, target))
}

// --- Mind maps ---

fn mindmap_prompt(context: &str) -> String {
    format!(
        "Analyze the following document content and generate a mind map structure.\n\n\
         IMPORTANT: Respond ONLY with valid JSON in the following format:\n\
         {{\n    \"title\": \"Main Topic\",\n    \"nodes\": [\n        {{\"id\": \"1\", \"label\": \"Major Topic 1\", \"children\": [\n            {{\"id\": \"1.1\", \"label\": \"Subtopic 1.1\"}},\n            {{\"id\": \"1.2\", \"label\": \"Subtopic 1.2\"}}\n        ]}},\n        {{\"id\": \"2\", \"label\": \"Major Topic 2\", \"children\": [\n            {{\"id\": \"2.1\", \"label\": \"Subtopic 2.1\"}}\n        ]}}\n    ]\n}}\n\n\
         Rules:\n\
         - Create 3-6 major topics\n\
         - Each major topic should have 2-4 subtopics\n\
         - Keep labels concise (2-6 words)\n\
         - Cover all key themes\n\n\
         Document Content:\n{context}\n\n\
         Generate the mind map structure."
    )
}

/// Merges partial mind maps: the first title wins, top-level nodes are
/// renumbered sequentially from 1 and children get dotted ids under their
/// parent.
pub fn merge_mindmaps(maps: Vec<MindMapDoc>) -> MindMapDoc {
    let title = maps
        .first()
        .map(|m| m.title.clone())
        .unwrap_or_else(|| "Document Overview".to_string());

    let mut nodes = Vec::new();
    let mut counter = 1usize;
    for map in maps {
        for node in map.nodes {
            let id = counter.to_string();
            let children = node.children.map(|children| {
                children
                    .into_iter()
                    .enumerate()
                    .map(|(j, child)| MindMapNode {
                        id: format!("{id}.{}", j + 1),
                        label: child.label,
                        children: child
                            .children
                            .map(|gc| parse::normalize_nodes(gc, &format!("{id}.{}.", j + 1))),
                    })
                    .collect()
            });
            nodes.push(MindMapNode {
                id,
                label: node.label,
                children,
            });
            counter += 1;
        }
    }

    MindMapDoc { title, nodes }
}

/// Batched mind-map generation with the merge step; single-shot outside
/// local mode.
pub async fn generate_mindmap(
    provider: &Arc<dyn LlmProvider>,
    chunks: &[SampledChunk],
    local: bool,
    seed: u64,
) -> Result<MindMapDoc> {
    let selected = select_stratified(chunks, SELECTION_TARGET, seed);
    tracing::info!(
        selected = selected.len(),
        total = chunks.len(),
        local,
        "Generating mind map"
    );

    if local && selected.len() > BATCH_SIZE {
        let parts = batches(&selected);
        let mut partials = Vec::new();
        for (i, batch) in parts.iter().enumerate() {
            tracing::debug!(batch = i + 1, batches = parts.len(), "Mind map batch");
            let response = provider
                .generate_simple(&mindmap_prompt(&join_contents(batch)))
                .await?;
            if let Some(parsed) = parse::parse_mindmap(&response) {
                partials.push(parsed);
            }
        }
        if partials.is_empty() {
            return Err(Error::Provider(
                "failed to parse mind map response from the model".to_string(),
            ));
        }
        Ok(merge_mindmaps(partials))
    } else {
        let response = provider
            .generate_simple(&mindmap_prompt(&join_contents(&selected)))
            .await?;
        let parsed = parse::parse_mindmap(&response).ok_or_else(|| {
            Error::Provider("failed to parse mind map response from the model".to_string())
        })?;
        Ok(MindMapDoc {
            title: parsed.title,
            nodes: parse::normalize_nodes(parsed.nodes, ""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(i: usize) -> SampledChunk {
        SampledChunk {
            source: "doc.txt".to_string(),
            content: format!("chunk {i}"),
        }
    }

    fn corpus(n: usize) -> Vec<SampledChunk> {
        (0..n).map(chunk).collect()
    }

    #[test]
    fn test_small_corpus_is_taken_whole() {
        let chunks = corpus(10);
        let selected = select_stratified(&chunks, 30, 1);
        assert_eq!(selected, chunks);
    }

    #[test]
    fn test_selection_is_deterministic_for_seed() {
        let chunks = corpus(200);
        let a = select_stratified(&chunks, 30, 42);
        let b = select_stratified(&chunks, 30, 42);
        let c = select_stratified(&chunks, 30, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_selection_covers_head_and_tail() {
        let chunks = corpus(200);
        let selected = select_stratified(&chunks, 30, 7);
        assert_eq!(selected.len(), 30);
        // At least one chunk from the first and last deciles.
        assert!(selected.iter().any(|c| c.content == "chunk 0"));
        assert!(selected.iter().any(|c| {
            let idx: usize = c.content.trim_start_matches("chunk ").parse().unwrap();
            idx >= 180
        }));
    }

    #[test]
    fn test_selection_head_tail_bounds() {
        // Tiny corpus relative to target: head/tail capped at n/3.
        let chunks = corpus(40);
        let selected = select_stratified(&chunks, 30, 3);
        assert_eq!(selected.len(), 30);
    }

    #[test]
    fn test_dedupe_is_idempotent_and_case_insensitive() {
        let cards = vec![
            FlashcardDraft {
                front: "What is Rust?".to_string(),
                back: "a language".to_string(),
            },
            FlashcardDraft {
                front: "what is rust?".to_string(),
                back: "duplicate".to_string(),
            },
            FlashcardDraft {
                front: "What is Cargo?".to_string(),
                back: "a build tool".to_string(),
            },
        ];

        let once = dedupe_flashcards(cards.clone(), 10);
        assert_eq!(once.len(), 2);
        assert_eq!(once[0].back, "a language");

        let doubled: Vec<FlashcardDraft> =
            cards.iter().cloned().chain(cards.iter().cloned()).collect();
        assert_eq!(dedupe_flashcards(doubled, 10), once);
    }

    #[test]
    fn test_dedupe_caps_at_target() {
        let cards: Vec<FlashcardDraft> = (0..20)
            .map(|i| FlashcardDraft {
                front: format!("Q{i}?"),
                back: format!("A{i}"),
            })
            .collect();
        assert_eq!(dedupe_flashcards(cards, 15).len(), 15);
    }

    #[test]
    fn test_merge_renumbers_sequentially() {
        let part = |labels: &[&str]| MindMapDoc {
            title: "first".to_string(),
            nodes: labels
                .iter()
                .map(|l| MindMapNode {
                    id: "9".to_string(),
                    label: l.to_string(),
                    children: Some(vec![MindMapNode {
                        id: "x".to_string(),
                        label: format!("{l} child"),
                        children: None,
                    }]),
                })
                .collect(),
        };

        let merged = merge_mindmaps(vec![part(&["a", "b"]), part(&["c"])]);
        assert_eq!(merged.title, "first");
        let ids: Vec<&str> = merged.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(merged.nodes[2].children.as_ref().unwrap()[0].id, "3.1");
    }

    #[test]
    fn test_merge_of_nothing_is_empty_overview() {
        let merged = merge_mindmaps(Vec::new());
        assert_eq!(merged.title, "Document Overview");
        assert!(merged.nodes.is_empty());
    }
}
