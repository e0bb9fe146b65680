//! Prompt templates for grounded procedure answers

use crate::types::{RetrievalResult, ScoredChunk};

/// Marker appended to a chunk cut short by the context budget
const TRUNCATION_MARKER: &str = " [...]";

/// A rendered prompt and the chunks it contains, in prompt order
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub prompt: String,
    pub included: Vec<ScoredChunk>,
}

/// Prompt builder with a character budget for retrieved context
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Build the full prompt for `question` over `retrieval`
    ///
    /// Hits are taken best-first until the next block would overflow the
    /// budget, so the lowest-scoring chunks are the ones dropped. A single
    /// hit larger than the budget is cut to fit.
    pub fn build(&self, question: &str, retrieval: &RetrievalResult) -> BuiltPrompt {
        let mut ranked: Vec<&ScoredChunk> = retrieval.hits.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut context = String::new();
        let mut used = 0usize;
        let mut included = Vec::new();

        for hit in ranked {
            let block = Self::format_block(included.len() + 1, hit, &hit.chunk.content);
            let len = block.chars().count();

            if used + len <= self.max_context_chars {
                used += len;
                context.push_str(&block);
                included.push(hit.clone());
                continue;
            }

            if included.is_empty() {
                let header = Self::format_block(1, hit, "");
                let room = self
                    .max_context_chars
                    .saturating_sub(header.chars().count() + TRUNCATION_MARKER.len());
                let mut content: String = hit.chunk.content.chars().take(room).collect();
                content.push_str(TRUNCATION_MARKER);
                context.push_str(&Self::format_block(1, hit, &content));
                included.push(hit.clone());
            }
            break;
        }

        let dropped = retrieval.len() - included.len();
        if dropped > 0 {
            tracing::debug!(
                "Context budget of {} chars dropped {} lowest-scoring chunks",
                self.max_context_chars,
                dropped
            );
        }

        BuiltPrompt {
            prompt: Self::build_rag_prompt(question, &context),
            included,
        }
    }

    /// One numbered context block labelled with file, product, and page
    fn format_block(number: usize, hit: &ScoredChunk, content: &str) -> String {
        let chunk = &hit.chunk;
        let pages = if chunk.page_start == chunk.page_end {
            format!("Page {}", chunk.page_start)
        } else {
            format!("Pages {}-{}", chunk.page_start, chunk.page_end)
        };

        format!(
            "[{}] {} (Product: {}, {})\n{}\n---\n",
            number,
            chunk.source_name,
            chunk.category.display_name(),
            pages,
            content.trim()
        )
    }

    /// Build the full RAG prompt with strict grounding
    pub fn build_rag_prompt(question: &str, context: &str) -> String {
        format!(
            r#"You are a helpful assistant that provides step-by-step procedures based on product manuals and Standard Operating Procedures (SOPs).

GROUNDING RULES:
1. ONLY use information stated in the CONTEXT below
2. If the context does not contain enough information, say so clearly
3. NEVER use outside knowledge or guess at missing steps
4. Reference the document and page for each step: [Source: filename, Page X]

RESPONSE STRUCTURE:
- For procedures, give clear numbered step-by-step instructions
- Focus on actionable steps
- Include any safety warnings or important notes from the source material

CONTEXT FROM DOCUMENTS:
{context}
QUESTION: {question}

Answer:"#,
            context = context,
            question = question.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ProductCategory};
    use uuid::Uuid;

    fn hit(index: u32, score: f32, content: &str) -> ScoredChunk {
        let doc = Uuid::nil();
        ScoredChunk {
            chunk: Chunk {
                id: Chunk::stable_id(&doc, index),
                document_id: doc,
                source_name: "Everbridge Setup Guide.pdf".to_string(),
                content: content.to_string(),
                chunk_index: index,
                page_start: index + 1,
                page_end: index + 1,
                category: ProductCategory::Everbridge,
                char_start: 0,
                char_end: content.chars().count(),
                overlap_chars: 0,
            },
            score,
        }
    }

    #[test]
    fn test_blocks_are_labelled() {
        let retrieval = RetrievalResult::new(vec![hit(0, 0.9, "Open Settings > Notifications.")]);
        let built = PromptBuilder::new(10_000).build("How do I configure notifications?", &retrieval);
        assert!(built
            .prompt
            .contains("[1] Everbridge Setup Guide.pdf (Product: Everbridge, Page 1)"));
        assert!(built.prompt.contains("QUESTION: How do I configure notifications?"));
        assert_eq!(built.included.len(), 1);
    }

    #[test]
    fn test_budget_drops_lowest_scores_first() {
        let body = "x".repeat(200);
        let retrieval = RetrievalResult::new(vec![
            hit(0, 0.9, &body),
            hit(1, 0.8, &body),
            hit(2, 0.4, &body),
        ]);
        let built = PromptBuilder::new(600).build("question", &retrieval);
        let kept: Vec<u32> = built.included.iter().map(|h| h.chunk.chunk_index).collect();
        assert_eq!(kept, vec![0, 1]);
    }

    #[test]
    fn test_oversized_top_chunk_is_truncated() {
        let retrieval = RetrievalResult::new(vec![hit(0, 0.9, &"y".repeat(5_000))]);
        let built = PromptBuilder::new(300).build("question", &retrieval);
        assert_eq!(built.included.len(), 1);
        assert!(built.prompt.contains(TRUNCATION_MARKER));
        assert!(!built.prompt.contains(&"y".repeat(400)));
    }
}
