//! Text generation capability used by the answer synthesizer

use async_trait::async_trait;
use crate::error::Result;

/// Trait for prompt-in, text-out generation
///
/// Implementations:
/// - `OllamaLlm`: local Ollama server (llama3.2, phi3, etc.)
///
/// Failures surface as `ProviderUnavailable` or `ProviderTimeout`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for a fully built prompt
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
