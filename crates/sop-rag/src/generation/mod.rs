//! Answer generation with the LLM and source attribution

pub mod ollama;
pub mod prompt;
mod synthesizer;

pub use ollama::OllamaClient;
pub use prompt::{BuiltPrompt, PromptBuilder};
pub use synthesizer::AnswerSynthesizer;
