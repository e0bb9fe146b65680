//! Query request types

use serde::{Deserialize, Serialize};

use super::category::ProductCategory;
use crate::error::{Error, Result};

/// Shortest accepted question, in chars
pub const MIN_QUESTION_CHARS: usize = 3;
/// Longest accepted question, in chars
pub const MAX_QUESTION_CHARS: usize = 1000;

/// Query request for RAG search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The question to answer
    pub question: String,

    /// Restrict retrieval to one product category (optional)
    #[serde(default)]
    pub category: Option<ProductCategory>,

    /// Number of chunks to retrieve (config default when omitted)
    #[serde(default)]
    pub k: Option<usize>,

    /// Minimum cosine similarity (config default when omitted)
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl QueryRequest {
    /// Create a new query
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            category: None,
            k: None,
            min_score: None,
        }
    }

    /// Filter by product category
    pub fn with_category(mut self, category: ProductCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Set the number of results to retrieve
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Set the similarity threshold
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Reject questions that are too short, too long, or carry bad parameters
    pub fn validate(&self) -> Result<()> {
        let chars = self.question.trim().chars().count();
        if chars < MIN_QUESTION_CHARS {
            return Err(Error::InvalidQuery(format!(
                "Please enter a more specific question (at least {} characters).",
                MIN_QUESTION_CHARS
            )));
        }
        if self.question.chars().count() > MAX_QUESTION_CHARS {
            return Err(Error::InvalidQuery(format!(
                "Question is too long. Please keep it under {} characters.",
                MAX_QUESTION_CHARS
            )));
        }
        if self.k == Some(0) {
            return Err(Error::InvalidQuery("k must be at least 1".to_string()));
        }
        if let Some(score) = self.min_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::InvalidQuery(format!(
                    "min_score ({}) must be within [0, 1]",
                    score
                )));
            }
        }
        Ok(())
    }
}
