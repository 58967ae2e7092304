//! Embedder trait: turns content text into fixed-dimension vectors.
//!
//! The ranking formulas in the memory store only see vectors, so a real
//! embedding model can replace the default hash embedder without touching
//! them.

use async_trait::async_trait;

use crate::error::MemoryError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// The embedder name (e.g., "hash").
    fn name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed one piece of text. Must be deterministic for a given input.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, MemoryError>;
}
