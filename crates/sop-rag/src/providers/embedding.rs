//! Embedding provider trait for generating text embeddings

use async_trait::async_trait;
use crate::error::Result;

/// Trait for generating text embeddings
///
/// Implementations:
/// - `OllamaEmbedder`: remote Ollama server (nomic-embed-text, 768 dims)
/// - `OnnxEmbedder`: local all-MiniLM-L6-v2 on ONNX Runtime (384 dims)
///
/// Output must be deterministic for a fixed provider/model and always
/// `dimensions()` long.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    ///
    /// Default implementation calls `embed` sequentially.
    /// Callers must not pass more than `max_batch_size()` texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Largest batch the provider accepts in one call
    fn max_batch_size(&self) -> usize {
        32
    }

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging and index bookkeeping
    fn name(&self) -> &str;
}
