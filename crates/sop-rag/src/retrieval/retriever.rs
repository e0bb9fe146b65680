//! Query embedding plus index search

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::processing::{EmbeddingRouter, Route};
use crate::types::RetrievalResult;

use super::index::{IndexFilter, VectorIndex};

/// Embeds queries with the active provider and searches the index
pub struct Retriever {
    index: Arc<VectorIndex>,
    embeddings: Arc<EmbeddingRouter>,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embeddings: Arc<EmbeddingRouter>) -> Self {
        Self { index, embeddings }
    }

    /// Ranked chunks for `query_text`; empty when nothing clears `min_score`
    ///
    /// The embedding call is made before the index lock is taken.
    pub async fn retrieve(
        &self,
        query_text: &str,
        filter: &IndexFilter,
        k: usize,
        min_score: f32,
    ) -> Result<RetrievalResult> {
        if self.index.count(filter) == 0 {
            tracing::debug!("No indexed chunks match {:?}; skipping query embedding", filter);
            return Ok(RetrievalResult::empty());
        }

        let (query_vector, route) = self.embeddings.embed_query(query_text).await?;
        let result = match self.index.search(&query_vector, k, filter, min_score) {
            // The index moved to the fallback while the primary was answering
            Err(Error::DimensionMismatch { .. })
                if route == Route::Primary && self.embeddings.is_degraded() =>
            {
                let (query_vector, _) = self.embeddings.embed_query(query_text).await?;
                self.index.search(&query_vector, k, filter, min_score)?
            }
            other => other?,
        };

        tracing::info!(
            "Retrieved {} chunks (k={}, min_score={}, mean score {:.3})",
            result.len(),
            k,
            min_score,
            result.mean_score()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{EmbeddingProvider, HashingEmbedder};
    use crate::retrieval::IndexEntry;
    use crate::types::{Chunk, ProductCategory};
    use std::time::Duration;
    use uuid::Uuid;

    async fn setup(texts: &[(&str, ProductCategory)]) -> Retriever {
        let embedder = Arc::new(HashingEmbedder::new(64));
        let index = Arc::new(VectorIndex::in_memory().unwrap());
        index.attach_provider(embedder.name(), 64).unwrap();

        let doc = Uuid::new_v4();
        let mut entries = Vec::new();
        for (i, (text, category)) in texts.iter().enumerate() {
            let chunk = Chunk {
                id: Chunk::stable_id(&doc, i as u32),
                document_id: doc,
                source_name: "guide.txt".to_string(),
                content: text.to_string(),
                chunk_index: i as u32,
                page_start: 1,
                page_end: 1,
                category: *category,
                char_start: 0,
                char_end: text.chars().count(),
                overlap_chars: 0,
            };
            entries.push(IndexEntry::new(chunk, embedder.embed(text).await.unwrap()));
        }
        index.upsert(entries).unwrap();

        let router = EmbeddingRouter::new(
            embedder.clone(),
            Arc::new(HashingEmbedder::new(32)),
            index.clone(),
            Duration::from_secs(5),
        )
        .unwrap();
        Retriever::new(index, Arc::new(router))
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_chunk_first() {
        let retriever = setup(&[
            ("Configure notification templates in the Everbridge portal.", ProductCategory::Everbridge),
            ("Camera retention is set per recording server.", ProductCategory::Milestone),
        ])
        .await;

        let result = retriever
            .retrieve("configure notification templates", &IndexFilter::all(), 2, 0.0)
            .await
            .unwrap();
        assert_eq!(result.hits[0].chunk.category, ProductCategory::Everbridge);
    }

    #[tokio::test]
    async fn test_nothing_above_threshold_is_empty_not_error() {
        let retriever = setup(&[("Arm the alarm area.", ProductCategory::InnerRange)]).await;
        let result = retriever
            .retrieve("video export codec", &IndexFilter::all(), 3, 0.99)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_empty_filter_match_skips_embedding() {
        let retriever = setup(&[("Arm the alarm area.", ProductCategory::InnerRange)]).await;
        let result = retriever
            .retrieve("anything", &IndexFilter::category(ProductCategory::Milestone), 3, 0.0)
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
