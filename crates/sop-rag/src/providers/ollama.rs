//! Ollama-based providers for embeddings and LLM
//!
//! Wraps the shared OllamaClient to implement the provider traits.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{Error, Result};
use crate::generation::OllamaClient;

use super::embedding::EmbeddingProvider;
use super::llm::LlmProvider;

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl OllamaEmbedder {
    /// Create a new Ollama embedder with its own client
    pub fn new(llm: &LlmConfig, embeddings: &EmbeddingConfig) -> Result<Self> {
        let client = OllamaClient::new(
            llm.base_url.clone(),
            Duration::from_secs(embeddings.timeout_secs),
            llm.max_retries,
        )?;
        Ok(Self::from_client(Arc::new(client), embeddings))
    }

    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, embeddings: &EmbeddingConfig) -> Self {
        Self {
            client,
            model: embeddings.model.clone(),
            dimensions: embeddings.dimensions,
            batch_size: embeddings.batch_size,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(Error::provider_unavailable(
                "ollama",
                format!(
                    "model '{}' returned {}-dim vectors, expected {}",
                    self.model,
                    bad.len(),
                    self.dimensions
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::provider_unavailable("ollama", "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.client.embed_batch(&self.model, texts).await?;
        self.check_dimensions(&vectors)?;
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama LLM provider for answer generation
pub struct OllamaLlm {
    client: Arc<OllamaClient>,
    model: String,
    temperature: f32,
}

impl OllamaLlm {
    /// Create a new Ollama LLM provider
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = OllamaClient::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self::from_client(Arc::new(client), config))
    }

    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.generate_model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.client
            .generate(&self.model, prompt, self.temperature, max_tokens)
            .await
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_reports_configured_shape() {
        let embeddings = EmbeddingConfig {
            batch_size: 8,
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&LlmConfig::default(), &embeddings).unwrap();
        assert_eq!(embedder.dimensions(), 768);
        assert_eq!(embedder.max_batch_size(), 8);
        assert_eq!(embedder.model(), "nomic-embed-text");
    }

    #[test]
    fn test_wrong_length_vectors_are_rejected() {
        let embedder =
            OllamaEmbedder::new(&LlmConfig::default(), &EmbeddingConfig::default()).unwrap();
        let err = embedder.check_dimensions(&[vec![0.0; 384]]).unwrap_err();
        assert!(err.is_provider_failure());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_the_network() {
        let embedder =
            OllamaEmbedder::new(&LlmConfig::default(), &EmbeddingConfig::default()).unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
