//! Answer synthesis over retrieved chunks

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::providers::LlmProvider;
use crate::types::{Answer, RetrievalResult, SourceRef};

use super::prompt::PromptBuilder;

/// Turns a retrieval result into a grounded answer
pub struct AnswerSynthesizer {
    llm: Arc<dyn LlmProvider>,
    prompts: PromptBuilder,
    max_tokens: u32,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        max_context_chars: usize,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            prompts: PromptBuilder::new(max_context_chars),
            max_tokens,
            timeout,
        }
    }

    /// Generate an answer for `question` from `retrieval`
    ///
    /// An empty retrieval returns the fixed no-information answer without
    /// calling the generator. Generator failures surface as
    /// `GenerationUnavailable`.
    pub async fn synthesize(&self, question: &str, retrieval: &RetrievalResult) -> Result<Answer> {
        if retrieval.is_empty() {
            tracing::info!("No relevant chunks for question; returning no-information answer");
            return Ok(Answer::no_information());
        }

        let built = self.prompts.build(question, retrieval);
        tracing::debug!(
            "Prompt built with {} of {} chunks ({} chars)",
            built.included.len(),
            retrieval.len(),
            built.prompt.len()
        );

        let generated = tokio::time::timeout(
            self.timeout,
            self.llm.generate(&built.prompt, self.max_tokens),
        )
        .await
        .map_err(|_| Error::provider_timeout(self.llm.name(), self.timeout))
        .and_then(|r| r)
        .map_err(|e| {
            tracing::warn!("Generation with '{}' failed: {}", self.llm.model(), e);
            Error::GenerationUnavailable(e.to_string())
        })?;

        let sources = built.included.iter().map(SourceRef::from_hit).collect();
        Ok(Answer::grounded(generated.trim().to_string(), sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ProductCategory, ScoredChunk};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct ScriptedLlm {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::provider_unavailable("scripted", "quota exceeded"));
            }
            assert!(prompt.contains("CONTEXT FROM DOCUMENTS"));
            Ok("  1. Open Settings. [Source: guide.pdf, Page 2]  ".to_string())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(!self.fail)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }
    }

    fn synthesizer(fail: bool) -> (AnswerSynthesizer, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm {
            calls: AtomicUsize::new(0),
            fail,
        });
        let synth = AnswerSynthesizer::new(llm.clone(), 4_000, 256, Duration::from_secs(5));
        (synth, llm)
    }

    fn retrieval() -> RetrievalResult {
        let doc = Uuid::new_v4();
        RetrievalResult::new(vec![ScoredChunk {
            chunk: Chunk {
                id: Chunk::stable_id(&doc, 0),
                document_id: doc,
                source_name: "guide.pdf".to_string(),
                content: "Open Settings.".to_string(),
                chunk_index: 0,
                page_start: 2,
                page_end: 2,
                category: ProductCategory::Everbridge,
                char_start: 0,
                char_end: 14,
                overlap_chars: 0,
            },
            score: 0.8,
        }])
    }

    #[tokio::test]
    async fn test_empty_retrieval_short_circuits() {
        let (synth, llm) = synthesizer(false);
        let answer = synth.synthesize("anything?", &RetrievalResult::empty()).await.unwrap();
        assert!(answer.is_no_information());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_carries_sources() {
        let (synth, _) = synthesizer(false);
        let answer = synth.synthesize("How do I open settings?", &retrieval()).await.unwrap();
        assert!(answer.grounded);
        assert_eq!(answer.text, "1. Open Settings. [Source: guide.pdf, Page 2]");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].page, 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_generation_unavailable() {
        let (synth, _) = synthesizer(true);
        let err = synth.synthesize("How?", &retrieval()).await.unwrap_err();
        assert!(matches!(err, Error::GenerationUnavailable(_)));
        assert!(err.is_retryable());
    }
}
