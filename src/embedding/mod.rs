//! Text embedding and similarity
//!
//! Embeddings are fixed-length `f64` vectors. The concrete embedder is not
//! assumed to be safe for concurrent use, so every call goes through the
//! single-worker [`EmbeddingService`].

mod hashed;
mod service;

pub use hashed::HashedEmbedder;
pub use service::EmbeddingService;

use crate::error::{EmbedError, StoreError};

/// Default embedding width.
pub const DEFAULT_DIMENSIONS: usize = 512;

/// Default cap on the number of characters fed to the embedder.
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// A text-to-vector embedding primitive.
///
/// Implementations only need to be `Send`: the service moves the embedder onto
/// its worker thread and never calls it from two threads at once.
pub trait Embedder: Send {
    /// Width of the vectors produced by [`Embedder::embed`].
    fn dimensions(&self) -> usize;

    /// Embeds already-normalized text.
    fn embed(&mut self, text: &str) -> Result<Vec<f64>, EmbedError>;
}

/// Lowercases, collapses whitespace and caps text at `max_chars` characters.
pub fn normalize_text(text: &str, max_chars: usize) -> String {
    let lowered = text.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}

/// Cosine similarity in `[-1, 1]`.
///
/// Returns 0.0 for empty, mismatched-length or zero-norm inputs.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// `1 - cosine_similarity(a, b)`.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// Serializes a vector as little-endian `f64` bytes.
pub fn encode_vector(vector: &[f64]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_vector`].
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f64>, StoreError> {
    if bytes.len() % 8 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob length {} is not a multiple of 8",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}
