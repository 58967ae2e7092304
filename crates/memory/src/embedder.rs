//! Deterministic hash-based embedder.
//!
//! Feature hashing over lowercase word tokens: each token lands in one bucket
//! (chosen by its SHA-256 digest) with a digest-derived sign, and the result
//! is normalized to unit length. Texts sharing words get positive cosine
//! similarity; identical texts get 1.0. Stable across processes and builds.

use async_trait::async_trait;
use colony_core::{Embedder, MemoryError};
use sha2::{Digest, Sha256};

use crate::vector::normalize;

pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
    }

    /// Synchronous core of [`Embedder::embed`].
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return vector;
        }

        for token in Self::tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        if self.dimensions == 0 {
            return Err(MemoryError::EmbeddingFailed("hash embedder has zero dimensions".into()));
        }
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[tokio::test]
    async fn same_text_same_vector() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed("Hawaii community grant").await.unwrap();
        let b = embedder.embed("hawaii, COMMUNITY grant!").await.unwrap();
        assert_eq!(a.len(), 32);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn shared_words_score_higher_than_disjoint() {
        let embedder = HashEmbedder::new(256);
        let query = embedder.embed_text("ocean conservation funding");
        let close = embedder.embed_text("funding for ocean conservation programs");
        let far = embedder.embed_text("quarterly tax filing deadline");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8);
        assert!(embedder.embed_text("  ...  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn zero_dimensions_fail_to_embed() {
        let embedder = HashEmbedder::new(0);
        assert!(matches!(
            embedder.embed("anything").await,
            Err(MemoryError::EmbeddingFailed(_))
        ));
    }
}
