//! Feature-hashing embedder
//!
//! Projects word unigrams, word bigrams and character trigrams into a fixed
//! number of signed buckets, then L2-normalizes. Texts that share most of
//! their wording land close together, which is what repeated-prompt detection
//! needs; it does not capture paraphrase.
//!
//! Buckets come from SHA-256, so vectors stored by one build stay comparable
//! with vectors computed by any later one.

use sha2::{Digest, Sha256};

use super::{Embedder, DEFAULT_DIMENSIONS};
use crate::error::EmbedError;

const UNIGRAM_WEIGHT: f64 = 1.0;
const BIGRAM_WEIGHT: f64 = 0.7;
const TRIGRAM_WEIGHT: f64 = 0.25;

/// Limit on tokens considered per text
const MAX_TOKENS: usize = 1000;

pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, EmbedError> {
        if dimensions == 0 {
            return Err(EmbedError::Unavailable(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    /// Bucket index and sign for a feature.
    fn bucket(&self, feature: &str) -> (usize, f64) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let hash = u64::from_be_bytes(head);

        let idx = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }

    fn add_feature(&self, vector: &mut [f64], feature: &str, weight: f64) {
        let (idx, sign) = self.bucket(feature);
        vector[idx] += sign * weight;
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let tokens: Vec<&str> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty())
            .take(MAX_TOKENS)
            .collect();

        if tokens.is_empty() {
            return Err(EmbedError::Failed("text has no tokens".to_string()));
        }

        let mut vector = vec![0.0; self.dimensions];

        for token in &tokens {
            self.add_feature(&mut vector, &format!("w:{}", token), UNIGRAM_WEIGHT);

            let padded: Vec<char> = format!(" {} ", token).chars().collect();
            for tri in padded.windows(3) {
                let tri: String = tri.iter().collect();
                self.add_feature(&mut vector, &format!("c:{}", tri), TRIGRAM_WEIGHT);
            }
        }

        for pair in tokens.windows(2) {
            self.add_feature(
                &mut vector,
                &format!("b:{} {}", pair[0], pair[1]),
                BIGRAM_WEIGHT,
            );
        }

        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Err(EmbedError::Failed("embedding has zero norm".to_string()));
        }
        for v in vector.iter_mut() {
            *v /= norm;
        }

        Ok(vector)
    }
}
