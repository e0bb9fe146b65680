//! Configuration for the RAG pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV: &str = "SOP_RAG_CONFIG";

/// Main RAG pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Embedding configuration (primary + fallback)
    pub embeddings: EmbeddingConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
    /// Vector index configuration
    pub index: IndexConfig,
    /// Retrieval defaults
    pub retrieval: RetrievalConfig,
    /// Processing configuration
    pub processing: ProcessingConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: RagConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `SOP_RAG_CONFIG` if set, otherwise defaults, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var("SOP_RAG_OLLAMA_URL") {
            config.llm.base_url = url;
        }
        if let Ok(path) = std::env::var("SOP_RAG_INDEX_PATH") {
            config.index.path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SOP_RAG_MODEL_DIR") {
            config.embeddings.fallback_cache_dir = PathBuf::from(path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.fallback_max_length == 0 {
            return Err(Error::Config(
                "embeddings.fallback_max_length must be greater than zero".to_string(),
            ));
        }
        if self.embeddings.batch_size == 0 {
            return Err(Error::Config("embeddings.batch_size must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(Error::Config(format!(
                "retrieval.min_score ({}) must be within [0, 1]",
                self.retrieval.min_score
            )));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Primary (remote) embedding model served by Ollama
    pub model: String,
    /// Primary embedding dimensions (768 for nomic-embed-text)
    pub dimensions: usize,
    /// Local fallback model (sentence-transformers ONNX export)
    pub fallback_model: String,
    /// Local fallback embedding dimensions
    pub fallback_dimensions: usize,
    /// Directory holding `model.onnx` and `tokenizer.json`; downloaded when missing
    pub fallback_cache_dir: PathBuf,
    /// Token limit per text for the local model
    pub fallback_max_length: usize,
    /// Maximum texts per provider call
    pub batch_size: usize,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            fallback_model: "all-MiniLM-L6-v2".to_string(),
            fallback_dimensions: 384,
            fallback_cache_dir: data_dir().join("models").join("all-MiniLM-L6-v2"),
            fallback_max_length: 256,
            batch_size: 32,
            timeout_secs: 30,
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub generate_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
    /// Maximum tokens to generate per answer
    pub max_tokens: u32,
    /// Character budget for retrieved context in the prompt
    pub max_context_chars: usize,
    /// Answer with raw retrieved passages when generation is unavailable
    pub degraded_answers: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
            max_retries: 2,
            max_tokens: 1024,
            max_context_chars: 12_000,
            degraded_answers: true,
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// SQLite file backing the index
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("index.db"),
        }
    }
}

/// Absolute data directory so stores do not move with the working directory
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
        .join("sop-rag")
}

/// Retrieval defaults applied when a query omits them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks to retrieve
    pub top_k: usize,
    /// Minimum cosine similarity (0.0-1.0)
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.2,
        }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Chunked documents buffered ahead of the embedding stage
    pub pipeline_depth: usize,
    /// Timeout for ingesting a single document in seconds
    pub document_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            pipeline_depth: 2,
            document_timeout_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = RagConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.chunk_overlap = 100;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sop-rag.toml");
        std::fs::write(
            &path,
            "[chunking]\nchunk_size = 500\nchunk_overlap = 50\n\n[retrieval]\nmin_score = 0.3\n",
        )
        .unwrap();

        let config = RagConfig::from_file(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embeddings.fallback_dimensions, 384);
    }
}
