//! Provider abstractions for embeddings and LLM
//!
//! The pipeline only talks to these traits, so the remote Ollama backend and
//! the local ONNX model are interchangeable.

pub mod embedding;
#[cfg(test)]
pub(crate) mod hashing;
pub mod llm;
pub mod ollama;
pub mod onnx;

pub use embedding::EmbeddingProvider;
#[cfg(test)]
pub(crate) use hashing::HashingEmbedder;
pub use llm::LlmProvider;
pub use ollama::{OllamaEmbedder, OllamaLlm};
pub use onnx::OnnxEmbedder;
