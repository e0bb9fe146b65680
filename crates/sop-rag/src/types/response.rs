//! Retrieval and answer types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::ProductCategory;
use super::document::Chunk;

/// Fixed answer returned when nothing clears the score threshold
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find relevant information in the uploaded documents to answer this question. \
     Please make sure the appropriate manuals or SOPs have been uploaded, or try rephrasing your question.";

/// A chunk with its cosine similarity to the query (0.0-1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked, thresholded search output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Hits in descending score order
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(hits: Vec<ScoredChunk>) -> Self {
        Self { hits }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Mean score of the hits, 0.0 when empty
    pub fn mean_score(&self) -> f32 {
        if self.hits.is_empty() {
            return 0.0;
        }
        self.hits.iter().map(|h| h.score).sum::<f32>() / self.hits.len() as f32
    }
}

/// Attribution entry linking an answer to a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    /// Source filename
    pub source_name: String,
    /// First page covered by the chunk
    pub page: u32,
    pub category: ProductCategory,
    pub chunk_index: u32,
    /// Similarity score (0.0-1.0)
    pub score: f32,
}

impl SourceRef {
    /// Create a source reference from a scored chunk
    pub fn from_hit(hit: &ScoredChunk) -> Self {
        Self {
            chunk_id: hit.chunk.id,
            document_id: hit.chunk.document_id,
            source_name: hit.chunk.source_name.clone(),
            page: hit.chunk.page_start,
            category: hit.chunk.category,
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
        }
    }

    /// Format for display in text
    pub fn format_inline(&self) -> String {
        format!(
            "[Source: {}, Page {} (Product: {}, Chunk: {})]",
            self.source_name,
            self.page,
            self.category.display_name(),
            self.chunk_index
        )
    }
}

/// Generated answer with the chunks that grounded it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Answer text
    pub text: String,
    /// Chunks included in the prompt, in prompt order
    pub sources: Vec<SourceRef>,
    /// Whether the text came from the generator over retrieved context
    pub grounded: bool,
    /// Whether the text is raw retrieved context because generation failed
    pub degraded: bool,
    /// Mean similarity of the sources (0.0-1.0)
    pub confidence: f32,
}

impl Answer {
    /// Create a grounded answer
    pub fn grounded(text: String, sources: Vec<SourceRef>) -> Self {
        let confidence = mean(&sources);
        Self {
            text,
            sources,
            grounded: true,
            degraded: false,
            confidence,
        }
    }

    /// Fixed answer when retrieval found nothing
    pub fn no_information() -> Self {
        Self {
            text: NO_INFORMATION_ANSWER.to_string(),
            sources: Vec::new(),
            grounded: false,
            degraded: false,
            confidence: 0.0,
        }
    }

    /// Whether this is the fixed no-information answer
    pub fn is_no_information(&self) -> bool {
        self.sources.is_empty() && self.text == NO_INFORMATION_ANSWER
    }

    /// Degraded answer built from raw retrieved chunks when generation is down
    pub fn from_retrieval_only(retrieval: &RetrievalResult) -> Self {
        if retrieval.is_empty() {
            return Self::no_information();
        }

        let mut text = String::from(
            "Answer generation is currently unavailable. The most relevant passages are:\n",
        );
        for (i, hit) in retrieval.hits.iter().enumerate() {
            text.push_str(&format!(
                "\n[{}] {}\n{}\n",
                i + 1,
                hit.chunk.format_source(),
                hit.chunk.content.trim()
            ));
        }

        let sources: Vec<SourceRef> = retrieval.hits.iter().map(SourceRef::from_hit).collect();
        let confidence = mean(&sources);
        Self {
            text,
            sources,
            grounded: false,
            degraded: true,
            confidence,
        }
    }
}

fn mean(sources: &[SourceRef]) -> f32 {
    if sources.is_empty() {
        0.0
    } else {
        sources.iter().map(|s| s.score).sum::<f32>() / sources.len() as f32
    }
}

/// Snapshot returned by the status operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub document_count: usize,
    pub chunk_count: usize,
    /// Name of the embedding provider currently in use
    pub active_provider: String,
    /// Whether the pipeline runs on the fallback provider
    pub degraded: bool,
    /// Dimensionality recorded by the index, if any vectors are stored
    pub index_dimensions: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_information_answer_has_no_sources() {
        let answer = Answer::no_information();
        assert!(answer.is_no_information());
        assert!(!answer.grounded);
        assert_eq!(answer.confidence, 0.0);
    }

    #[test]
    fn test_retrieval_only_on_empty_is_no_information() {
        let answer = Answer::from_retrieval_only(&RetrievalResult::empty());
        assert!(answer.is_no_information());
    }
}
