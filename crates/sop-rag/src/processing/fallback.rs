//! Embedding provider selection with session-wide fallback
//!
//! The router starts on the primary provider. The first `ProviderUnavailable`
//! or `ProviderTimeout` switches the whole session to the fallback provider,
//! which is only allowed when the index is empty or already holds vectors
//! of the fallback's dimensionality.
//!
//! Switching and index writes are serialised on one lock, so vectors from a
//! primary call that was in flight during the switch never reach the index.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::retrieval::{IndexEntry, IndexFilter, VectorIndex};

/// Which provider produced a set of vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Fallback,
}

/// Vectors plus the route that produced them
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vectors: Vec<Vec<f32>>,
    pub route: Route,
}

/// Index binding shared with blocking write tasks
struct Binding {
    index: Arc<VectorIndex>,
    degraded: AtomicBool,
    lock: Mutex<()>,
}

impl Binding {
    /// Attach the fallback and mark the session degraded; false if already degraded
    fn switch(&self, name: &str, dimensions: usize) -> Result<bool> {
        let _guard = self.lock.lock();
        if self.degraded.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.index.attach_provider(name, dimensions)?;
        self.degraded.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Bind and write atomically; `None` when primary vectors arrive after the switch
    fn commit(
        &self,
        route: Route,
        name: &str,
        dimensions: usize,
        document_id: Uuid,
        entries: Vec<IndexEntry>,
    ) -> Result<Option<usize>> {
        let _guard = self.lock.lock();
        if route == Route::Primary && self.degraded.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.index.attach_provider(name, dimensions)?;
        self.index.replace_document(document_id, entries).map(Some)
    }
}

/// Routes embedding calls to the active provider
pub struct EmbeddingRouter {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: Arc<dyn EmbeddingProvider>,
    binding: Arc<Binding>,
    timeout: Duration,
}

impl EmbeddingRouter {
    /// Create a router bound to `index`
    ///
    /// Starts degraded when the index was built by the fallback provider.
    /// Fails with `DimensionMismatch` when the index holds vectors neither
    /// provider can produce.
    pub fn new(
        primary: Arc<dyn EmbeddingProvider>,
        fallback: Arc<dyn EmbeddingProvider>,
        index: Arc<VectorIndex>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut degraded = false;

        if let Some(meta) = index.provider() {
            let populated = index.count(&IndexFilter::all()) > 0;
            if meta.provider == fallback.name() && meta.dimensions == fallback.dimensions() {
                degraded = true;
                tracing::warn!(
                    "Index was built with fallback provider '{}'; starting in degraded mode",
                    fallback.name()
                );
            } else if populated && meta.dimensions != primary.dimensions() {
                return Err(Error::DimensionMismatch {
                    expected: meta.dimensions,
                    actual: primary.dimensions(),
                    index_provider: meta.provider,
                    provider: primary.name().to_string(),
                });
            }
        }

        Ok(Self {
            primary,
            fallback,
            binding: Arc::new(Binding {
                index,
                degraded: AtomicBool::new(degraded),
                lock: Mutex::new(()),
            }),
            timeout,
        })
    }

    /// Whether the session runs on the fallback provider
    pub fn is_degraded(&self) -> bool {
        self.binding.degraded.load(Ordering::SeqCst)
    }

    /// Provider currently serving embedding calls
    pub fn active(&self) -> Arc<dyn EmbeddingProvider> {
        if self.is_degraded() {
            Arc::clone(&self.fallback)
        } else {
            Arc::clone(&self.primary)
        }
    }

    pub fn active_name(&self) -> String {
        self.active().name().to_string()
    }

    /// Provider behind `route`
    pub fn provider(&self, route: Route) -> &Arc<dyn EmbeddingProvider> {
        match route {
            Route::Primary => &self.primary,
            Route::Fallback => &self.fallback,
        }
    }

    /// Embed `texts` with the active provider
    ///
    /// A provider failure on the primary moves the session to the fallback
    /// and retries there, even when another call already made the switch.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Embedded> {
        let route = if self.is_degraded() {
            Route::Fallback
        } else {
            Route::Primary
        };

        match self.embed_with(self.provider(route).as_ref(), texts).await {
            Ok(vectors) => Ok(Embedded { vectors, route }),
            Err(e) if e.is_provider_failure() && route == Route::Primary => {
                self.switch_to_fallback(&e).await?;
                let vectors = self.embed_with(self.fallback.as_ref(), texts).await?;
                Ok(Embedded {
                    vectors,
                    route: Route::Fallback,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Embed a single query string with the active provider
    pub async fn embed_query(&self, text: &str) -> Result<(Vec<f32>, Route)> {
        let mut embedded = self.embed_texts(&[text.to_string()]).await?;
        let vector = embedded
            .vectors
            .pop()
            .ok_or_else(|| Error::internal("Embedding provider returned no vector"))?;
        Ok((vector, embedded.route))
    }

    /// Replace `document_id`'s entries with vectors made on `route`
    ///
    /// Returns `None` when the session switched to the fallback after the
    /// vectors were made; the caller re-embeds and commits again.
    pub async fn commit(
        &self,
        route: Route,
        document_id: Uuid,
        entries: Vec<IndexEntry>,
    ) -> Result<Option<usize>> {
        let provider = self.provider(route);
        let name = provider.name().to_string();
        let dimensions = provider.dimensions();
        let binding = Arc::clone(&self.binding);

        // Runs to completion even if the caller stops waiting
        tokio::task::spawn_blocking(move || {
            binding.commit(route, &name, dimensions, document_id, entries)
        })
        .await?
    }

    /// Call `provider` in batches no larger than its limit, each under the timeout
    async fn embed_with(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let batch_size = provider.max_batch_size().max(1);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let embedded = tokio::time::timeout(self.timeout, provider.embed_batch(batch))
                .await
                .map_err(|_| Error::provider_timeout(provider.name(), self.timeout))??;

            if embedded.len() != batch.len() {
                return Err(Error::provider_unavailable(
                    provider.name(),
                    format!("expected {} vectors, got {}", batch.len(), embedded.len()),
                ));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != provider.dimensions()) {
                return Err(Error::provider_unavailable(
                    provider.name(),
                    format!(
                        "returned {}-dim vector, declared {}",
                        bad.len(),
                        provider.dimensions()
                    ),
                ));
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    /// Move the session onto the fallback provider
    async fn switch_to_fallback(&self, cause: &Error) -> Result<()> {
        let name = self.fallback.name().to_string();
        let dims = self.fallback.dimensions();
        let binding = Arc::clone(&self.binding);

        let switched = {
            let name = name.clone();
            tokio::task::spawn_blocking(move || binding.switch(&name, dims)).await?
        };

        match switched {
            Ok(true) => {
                tracing::warn!(
                    "Primary embedding provider '{}' failed ({}); switching to fallback '{}' ({} dims) for the rest of the session",
                    self.primary.name(),
                    cause,
                    name,
                    dims
                );
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                tracing::error!(
                    "Primary embedding provider '{}' failed ({}) and fallback '{}' cannot attach: {}",
                    self.primary.name(),
                    cause,
                    name,
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashingEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Primary that always fails and counts its calls
    struct DownProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for DownProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::provider_unavailable("down", "connection refused"))
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    /// Primary that never answers in time
    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0.0; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn entry(doc: uuid::Uuid, dims: usize) -> IndexEntry {
        use crate::types::{Chunk, ProductCategory};
        IndexEntry::new(
            Chunk {
                id: Chunk::stable_id(&doc, 0),
                document_id: doc,
                source_name: "a.txt".to_string(),
                content: "a".to_string(),
                chunk_index: 0,
                page_start: 1,
                page_end: 1,
                category: ProductCategory::General,
                char_start: 0,
                char_end: 1,
                overlap_chars: 0,
            },
            vec![1.0; dims],
        )
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("step {} of the procedure", i)).collect()
    }

    #[tokio::test]
    async fn test_switches_to_fallback_on_fresh_index() {
        let primary = Arc::new(DownProvider {
            calls: AtomicUsize::new(0),
        });
        let index = Arc::new(VectorIndex::in_memory().unwrap());
        let router = EmbeddingRouter::new(
            primary.clone(),
            Arc::new(HashingEmbedder::new(4)),
            index.clone(),
            Duration::from_secs(5),
        )
        .unwrap();

        let embedded = router.embed_texts(&texts(3)).await.unwrap();
        assert_eq!(embedded.route, Route::Fallback);
        assert!(embedded.vectors.iter().all(|v| v.len() == 4));
        assert!(router.is_degraded());
        assert_eq!(index.dimensions(), Some(4));

        // Later calls go straight to the fallback
        router.embed_query("reset a door").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_provider_failure() {
        let router = EmbeddingRouter::new(
            Arc::new(SlowProvider),
            Arc::new(HashingEmbedder::new(4)),
            Arc::new(VectorIndex::in_memory().unwrap()),
            Duration::from_millis(20),
        )
        .unwrap();

        let (vector, route) = router.embed_query("camera offline").await.unwrap();
        assert_eq!(vector.len(), 4);
        assert_eq!(route, Route::Fallback);
        assert_eq!(router.active_name(), "hashing");
    }

    #[tokio::test]
    async fn test_fallback_refused_on_populated_index() {
        let index = Arc::new(VectorIndex::in_memory().unwrap());
        index.attach_provider("down", 8).unwrap();
        index.upsert(vec![entry(uuid::Uuid::new_v4(), 8)]).unwrap();

        let router = EmbeddingRouter::new(
            Arc::new(DownProvider {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(HashingEmbedder::new(4)),
            index,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = router.embed_query("anything").await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 8, actual: 4, .. }));
        assert!(!router.is_degraded());
    }

    #[tokio::test]
    async fn test_starts_degraded_on_fallback_index() {
        let index = Arc::new(VectorIndex::in_memory().unwrap());
        index.attach_provider("hashing", 4).unwrap();

        let router = EmbeddingRouter::new(
            Arc::new(DownProvider {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(HashingEmbedder::new(4)),
            index,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(router.is_degraded());
    }

    #[tokio::test]
    async fn test_batches_respect_provider_limit() {
        struct Counting {
            batches: AtomicUsize,
        }

        #[async_trait]
        impl EmbeddingProvider for Counting {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }

            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                assert!(texts.len() <= 4);
                self.batches.fetch_add(1, Ordering::SeqCst);
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }

            fn dimensions(&self) -> usize {
                2
            }

            fn max_batch_size(&self) -> usize {
                4
            }

            async fn health_check(&self) -> Result<bool> {
                Ok(true)
            }

            fn name(&self) -> &str {
                "counting"
            }
        }

        let primary = Arc::new(Counting {
            batches: AtomicUsize::new(0),
        });
        let router = EmbeddingRouter::new(
            primary.clone(),
            Arc::new(HashingEmbedder::new(4)),
            Arc::new(VectorIndex::in_memory().unwrap()),
            Duration::from_secs(5),
        )
        .unwrap();

        let embedded = router.embed_texts(&texts(10)).await.unwrap();
        assert_eq!(embedded.vectors.len(), 10);
        assert_eq!(primary.batches.load(Ordering::SeqCst), 3);
    }

    /// Primary that fails after `delay`, so a second call can switch first
    struct LateFailure {
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for LateFailure {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(self.delay).await;
            Err(Error::provider_unavailable("late", "connection reset"))
        }

        fn dimensions(&self) -> usize {
            8
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        fn name(&self) -> &str {
            "late"
        }
    }

    #[tokio::test]
    async fn test_failure_after_switch_still_uses_fallback() {
        let router = EmbeddingRouter::new(
            Arc::new(LateFailure {
                delay: Duration::from_millis(50),
            }),
            Arc::new(HashingEmbedder::new(4)),
            Arc::new(VectorIndex::in_memory().unwrap()),
            Duration::from_secs(5),
        )
        .unwrap();

        let slow_texts = texts(1);
        let slow = router.embed_texts(&slow_texts);
        let fast = async {
            // Switch the session while the first call is still waiting
            router.switch_to_fallback(&Error::provider_unavailable("late", "down")).await
        };
        let (slow, fast) = tokio::join!(slow, fast);

        fast.unwrap();
        let embedded = slow.unwrap();
        assert_eq!(embedded.route, Route::Fallback);
        assert_eq!(embedded.vectors[0].len(), 4);
    }

    #[tokio::test]
    async fn test_primary_vectors_rejected_after_switch() {
        let index = Arc::new(VectorIndex::in_memory().unwrap());
        let router = EmbeddingRouter::new(
            Arc::new(SlowProvider),
            Arc::new(HashingEmbedder::new(4)),
            index.clone(),
            Duration::from_secs(5),
        )
        .unwrap();

        router
            .switch_to_fallback(&Error::provider_unavailable("slow", "down"))
            .await
            .unwrap();

        let doc = uuid::Uuid::new_v4();
        let stale = router.commit(Route::Primary, doc, vec![entry(doc, 8)]).await.unwrap();
        assert_eq!(stale, None);
        assert_eq!(index.dimensions(), Some(4));
        assert_eq!(index.count(&IndexFilter::all()), 0);

        let written = router.commit(Route::Fallback, doc, vec![entry(doc, 4)]).await.unwrap();
        assert_eq!(written, Some(1));
    }

    #[tokio::test]
    async fn test_commit_before_switch_keeps_primary() {
        let index = Arc::new(VectorIndex::in_memory().unwrap());
        let router = EmbeddingRouter::new(
            Arc::new(SlowProvider),
            Arc::new(HashingEmbedder::new(4)),
            index.clone(),
            Duration::from_secs(5),
        )
        .unwrap();

        let doc = uuid::Uuid::new_v4();
        router.commit(Route::Primary, doc, vec![entry(doc, 8)]).await.unwrap();

        let err = router
            .switch_to_fallback(&Error::provider_unavailable("slow", "down"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert!(!router.is_degraded());
        assert_eq!(index.dimensions(), Some(8));
    }
}
