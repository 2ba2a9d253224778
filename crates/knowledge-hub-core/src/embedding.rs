//! Embedding collaborator trait.
//!
//! Concrete providers (Ollama, OpenAI) live in the `knowledge-hub` app
//! crate.

use anyhow::Result;
use async_trait::async_trait;

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
