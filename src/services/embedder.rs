use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Maps text to a dense, L2-normalized vector. Cosine similarity over these
/// vectors equals the dot product. The profile tag and dimensionality are
/// immutable for the lifetime of a conversation.
pub trait Embedder: Send + Sync {
    fn profile(&self) -> &str;
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;

    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic feature-hashing embedder: unigrams and bigrams of the
/// lowercased token stream are hashed into `dimension` signed buckets and
/// the result is L2-normalized. Needs no model weights, which makes it the
/// built-in `custom` profile; heavier profiles plug in behind the same
/// trait.
pub struct HashingEmbedder {
    profile: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(profile: impl Into<String>, dimension: usize) -> Self {
        Self {
            profile: profile.into(),
            dimension,
        }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let hash = fnv1a64(feature.as_bytes());
        let index = (hash % self.dimension as u64) as usize;
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Embedder for HashingEmbedder {
    fn profile(&self) -> &str {
        &self.profile
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = Self::tokens(text);

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[index] += sign;
        }

        l2_normalize(&mut vector);
        vector
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Process-scoped registry of embedder instances, one per profile tag.
/// Instances are created lazily under a one-shot lock and shared by handle;
/// nothing else in the process holds embedder state.
pub struct EmbedderRegistry {
    dimension: usize,
    profiles: Mutex<HashMap<String, Arc<dyn Embedder>>>,
}

impl EmbedderRegistry {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the embedder for a profile tag, instantiating it on first
    /// use. Unknown tags get the hashing embedder under that tag, so a
    /// conversation's profile stays stable even when a specialty model is
    /// not installed.
    pub fn get(&self, profile: &str) -> Arc<dyn Embedder> {
        let mut profiles = self.profiles.lock().expect("embedder registry poisoned");
        profiles
            .entry(profile.to_string())
            .or_insert_with(|| Arc::new(HashingEmbedder::new(profile, self.dimension)))
            .clone()
    }
}

/// Embedding is CPU-bound; run batches on the blocking pool so the
/// scheduler stays responsive.
pub async fn embed_batch_blocking(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
        .await
        .map_err(|e| Error::Internal(format!("embedding task failed: {e}")))
}

pub async fn embed_one_blocking(embedder: Arc<dyn Embedder>, text: String) -> Result<Vec<f32>> {
    tokio::task::spawn_blocking(move || embedder.embed(&text))
        .await
        .map_err(|e| Error::Internal(format!("embedding task failed: {e}")))
}
