use crate::models::document::ChunkMetadata;

/// Separator priority for recursive splitting: paragraph, newline,
/// sentence, space, character.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// A chunk of a source document with its stable metadata. Identical input
/// always produces identical chunks and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Splits UTF-8 text into overlapping chunks, recursing down a separator
/// priority list so a chunk never exceeds the target size unless a single
/// unsplittable token does.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        debug_assert!(chunk_overlap < chunk_size);
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split one decoder source into chunks with `{source, chunk_index,
    /// chunk_id}` metadata, where `chunk_id == chunk_index`.
    pub fn chunk_source(&self, source: &str, text: &str) -> Vec<TextChunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(i, content)| TextChunk {
                content,
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    chunk_index: i,
                    chunk_id: i,
                },
            })
            .collect()
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        // First separator that actually occurs; "" always matches.
        let sep_pos = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators[sep_pos];

        if separator.is_empty() {
            return self.window_split(text);
        }

        let remaining = &separators[sep_pos + 1..];
        let mut pieces: Vec<String> = Vec::new();
        for piece in text.split(separator) {
            if char_len(piece) <= self.chunk_size {
                pieces.push(piece.to_string());
            } else {
                pieces.extend(self.split_with(piece, remaining));
            }
        }

        self.merge(pieces, separator)
    }

    /// Greedily joins pieces into chunks up to the target size, seeding each
    /// new chunk with the trailing pieces of the previous one up to the
    /// overlap budget.
    fn merge(&self, pieces: Vec<String>, separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let piece_len = char_len(&piece);
            let extra = if current.is_empty() { 0 } else { sep_len };

            if total + extra + piece_len > self.chunk_size && !current.is_empty() {
                chunks.push(current.join(separator));
                while total > self.chunk_overlap
                    || (total + sep_len + piece_len > self.chunk_size && total > 0)
                {
                    let removed = current.remove(0);
                    total -= char_len(&removed);
                    if !current.is_empty() {
                        total -= sep_len;
                    }
                    if current.is_empty() {
                        break;
                    }
                }
            }

            if !current.is_empty() {
                total += sep_len;
            }
            total += piece_len;
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.join(separator));
        }

        chunks
    }

    /// Character-level fallback: fixed windows stepping by size - overlap.
    fn window_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
