//! Embedding clients. One instance serves both indexing and question lookups so every vector
//! comes from the same model and dimensionality.

use anyhow::Result;
use async_trait::async_trait;

pub mod gemini;
pub mod openai;

pub use gemini::GeminiEmbedder;
pub use openai::OpenAiEmbedder;

/// Converts text into a fixed-length vector via a remote model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, logged at startup.
    fn model_name(&self) -> &str;

    /// Embeds a single string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
