//! Ollama HTTP client for embeddings and generation with retry logic

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Error, Result};

/// Provider name reported in errors
const PROVIDER: &str = "ollama";

/// Ollama API client with automatic retry
pub struct OllamaClient {
    /// HTTP client
    client: Client,
    /// Server base URL
    base_url: String,
    /// Request timeout
    timeout: Duration,
    /// Maximum retries
    max_retries: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaClient {
    /// Create a new Ollama client with retry support
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                        tracing::warn!(
                            "Ollama request failed (attempt {}/{}), retrying in {:?}",
                            attempt + 1,
                            self.max_retries + 1,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::provider_unavailable(PROVIDER, "unknown error")))
    }

    /// Map transport failures onto the provider taxonomy
    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::provider_timeout(PROVIDER, self.timeout)
        } else {
            Error::provider_unavailable(PROVIDER, err.to_string())
        }
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Embed a batch of texts with one request
    pub async fn embed_batch(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);

        self.retry_request(|| async {
            let request = EmbedRequest { model, input: texts };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            if !response.status().is_success() {
                return Err(Error::provider_unavailable(
                    PROVIDER,
                    format!("Embedding failed: HTTP {}", response.status()),
                ));
            }

            let embed_response: EmbedResponse = response.json().await.map_err(|e| {
                Error::provider_unavailable(PROVIDER, format!("Failed to parse embedding response: {}", e))
            })?;

            if embed_response.embeddings.len() != texts.len() {
                return Err(Error::provider_unavailable(
                    PROVIDER,
                    format!(
                        "Expected {} embeddings, got {}",
                        texts.len(),
                        embed_response.embeddings.len()
                    ),
                ));
            }

            Ok(embed_response.embeddings)
        })
        .await
    }

    /// Generate a completion with retry logic
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        tracing::info!("Generating answer with model: {}", model);

        self.retry_request(|| async {
            let request = GenerateRequest {
                model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    temperature,
                    num_predict: max_tokens,
                },
            };

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::provider_unavailable(
                    PROVIDER,
                    format!("Generation failed: HTTP {} - {}", status, body),
                ));
            }

            let generate_response: GenerateResponse = response.json().await.map_err(|e| {
                Error::provider_unavailable(PROVIDER, format!("Failed to parse generation response: {}", e))
            })?;

            Ok(generate_response.response)
        })
        .await
    }
}
