//! Pipeline orchestrator: ingestion and query paths
//!
//! Ingestion runs `extract -> chunk -> embed -> index`; queries run
//! `retrieve -> synthesize`. The index handle and providers are injected,
//! so several pipelines (or tests) can run side by side.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::generation::AnswerSynthesizer;
use crate::ingestion::{
    CategoryDetector, KeywordCategoryDetector, PlainTextExtractor, TextChunker, TextExtractor,
};
use crate::providers::{
    EmbeddingProvider, LlmProvider, OllamaEmbedder, OllamaLlm, OnnxEmbedder,
};
use crate::retrieval::{IndexEntry, IndexFilter, Retriever, VectorIndex};
use crate::types::{
    Answer, CategoryMatch, Chunk, Document, PipelineStatus, ProductCategory, QueryRequest,
};

use super::fallback::EmbeddingRouter;
use super::job::{BatchReport, IngestReport, IngestStage, QueryOutcome, QueryStage, QueryTrace};

/// Raw file submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    pub filename: String,
    pub data: Vec<u8>,
    /// Product category; detected when omitted
    #[serde(default)]
    pub category: Option<ProductCategory>,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: ProductCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Per-category listing for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: ProductCategory,
    pub display_name: String,
    pub help_text: String,
    pub chunk_count: usize,
}

/// Provider reachability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub embedding_provider: String,
    pub embedding_ok: bool,
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_ok: bool,
}

/// Work item flowing from the chunking stage to the embedding stage
enum Staged {
    Ready {
        report: IngestReport,
        document_id: Uuid,
        chunks: Vec<Chunk>,
    },
    Done(IngestReport),
}

enum Source {
    File(FileUpload),
    Document(Document),
}

/// Chunking-side collaborators, cheap to clone into blocking tasks
#[derive(Clone)]
struct Preparer {
    chunker: TextChunker,
    detector: Arc<dyn CategoryDetector>,
    extractor: Arc<dyn TextExtractor>,
}

impl Preparer {
    /// Extract (for files), pick a category, and chunk
    fn prepare(&self, source: Source) -> Staged {
        let (document, mut report) = match source {
            Source::Document(document) => {
                let report = IngestReport::received(&document.filename);
                (document, report)
            }
            Source::File(file) => {
                let mut report = IngestReport::received(&file.filename);
                match self.extractor.extract(&file.filename, &file.data) {
                    Ok(pages) => {
                        let mut document = Document::new(file.filename, pages);
                        document.category = file.category;
                        (document, report)
                    }
                    Err(e) => {
                        report.fail(&e);
                        return Staged::Done(report);
                    }
                }
            }
        };

        report.document_id = Some(document.id);
        report.advance(IngestStage::Chunking);

        let detected = match document.category {
            Some(category) => CategoryMatch::supplied(category),
            None => self.detector.detect(&document.filename, &document.full_text()),
        };
        report.set_category(detected);

        let chunks = self.chunker.chunk_document(&document, detected.category);
        if chunks.is_empty() {
            report.warn("extracted no text; nothing to index");
        }

        Staged::Ready {
            report,
            document_id: document.id,
            chunks,
        }
    }
}

/// The retrieval-augmented answer pipeline
pub struct Pipeline {
    config: RagConfig,
    index: Arc<VectorIndex>,
    embeddings: Arc<EmbeddingRouter>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    llm: Arc<dyn LlmProvider>,
    preparer: Preparer,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assemble a pipeline from injected collaborators
    pub fn new(
        config: RagConfig,
        index: Arc<VectorIndex>,
        primary: Arc<dyn EmbeddingProvider>,
        fallback: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let chunker = TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        let embeddings = Arc::new(EmbeddingRouter::new(
            primary,
            fallback,
            Arc::clone(&index),
            Duration::from_secs(config.embeddings.timeout_secs),
        )?);
        let retriever = Retriever::new(Arc::clone(&index), Arc::clone(&embeddings));
        let synthesizer = AnswerSynthesizer::new(
            Arc::clone(&llm),
            config.llm.max_context_chars,
            config.llm.max_tokens,
            Duration::from_secs(config.llm.timeout_secs),
        );

        Ok(Self {
            config,
            index,
            embeddings,
            retriever,
            synthesizer,
            llm,
            preparer: Preparer {
                chunker,
                detector: Arc::new(KeywordCategoryDetector::new()),
                extractor: Arc::new(PlainTextExtractor),
            },
        })
    }

    /// Open the configured index, connect Ollama and load the local model
    pub async fn from_config(config: RagConfig) -> Result<Self> {
        config.validate()?;

        let path = config.index.path.clone();
        let index = Arc::new(tokio::task::spawn_blocking(move || VectorIndex::open(&path)).await??);
        let primary = Arc::new(OllamaEmbedder::new(&config.llm, &config.embeddings)?);
        let fallback = Arc::new(OnnxEmbedder::load(&config.embeddings).await?);
        let llm = Arc::new(OllamaLlm::new(&config.llm)?);

        tracing::info!(
            "Pipeline ready: embeddings '{}' via {}, fallback '{}', generation '{}'",
            config.embeddings.model,
            config.llm.base_url,
            fallback.model(),
            config.llm.generate_model
        );

        tokio::task::spawn_blocking(move || Self::new(config, index, primary, fallback, llm)).await?
    }

    /// Replace the category detector
    pub fn with_detector(mut self, detector: Arc<dyn CategoryDetector>) -> Self {
        self.preparer.detector = detector;
        self
    }

    /// Replace the text extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.preparer.extractor = extractor;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    // ==================== Ingestion ====================

    /// Ingest one document; `category` overrides detection
    ///
    /// Failures are recorded in the report, never returned.
    pub async fn ingest(&self, mut document: Document, category: Option<ProductCategory>) -> IngestReport {
        if category.is_some() {
            document.category = category;
        }
        let started = Instant::now();
        let staged = self.preparer.prepare(Source::Document(document));
        let mut report = self.embed_and_index(staged).await;
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Extract and ingest raw files
    pub async fn ingest_files(&self, files: Vec<FileUpload>) -> BatchReport {
        self.run_batch(files.into_iter().map(Source::File).collect()).await
    }

    /// Ingest documents, each with its own `category` or detection
    pub async fn ingest_batch(&self, documents: Vec<Document>) -> BatchReport {
        self.run_batch(documents.into_iter().map(Source::Document).collect()).await
    }

    /// Chunk document N+1 while document N is being embedded
    async fn run_batch(&self, sources: Vec<Source>) -> BatchReport {
        let started = Instant::now();
        let total = sources.len();
        tracing::info!("Starting batch ingestion of {} documents", total);

        let (tx, mut rx) = mpsc::channel::<Staged>(self.config.processing.pipeline_depth.max(1));
        let preparer = self.preparer.clone();

        let producer = async move {
            for source in sources {
                let preparer = preparer.clone();
                let staged = match tokio::task::spawn_blocking(move || preparer.prepare(source)).await {
                    Ok(staged) => staged,
                    Err(e) => {
                        let mut report = IngestReport::received("<unknown>");
                        report.fail(&Error::from(e));
                        Staged::Done(report)
                    }
                };
                if tx.send(staged).await.is_err() {
                    break;
                }
            }
        };

        let consumer = async {
            let mut reports = Vec::with_capacity(total);
            while let Some(staged) = rx.recv().await {
                let item_started = Instant::now();
                let mut report = self.embed_and_index(staged).await;
                report.duration_ms = item_started.elapsed().as_millis() as u64;
                reports.push(report);
            }
            reports
        };

        let ((), reports) = tokio::join!(producer, consumer);
        let batch = BatchReport::from_reports(reports, started.elapsed().as_millis() as u64);

        tracing::info!(
            "Batch ingestion finished: {} indexed, {} failed, {} chunks in {}ms",
            batch.indexed,
            batch.failed,
            batch.total_chunks,
            batch.duration_ms
        );
        batch
    }

    /// Embed without holding the index lock, then swap the document's entries
    async fn embed_and_index(&self, staged: Staged) -> IngestReport {
        let (mut report, document_id, chunks) = match staged {
            Staged::Done(report) => return report,
            Staged::Ready {
                report,
                document_id,
                chunks,
            } => (report, document_id, chunks),
        };

        report.advance(IngestStage::Embedding);
        match self.embed_chunks(document_id, chunks).await {
            Ok((count, provider)) => {
                report.chunk_count = count;
                report.provider = provider;
                report.advance(IngestStage::Indexed);
                tracing::info!(
                    "Indexed {} ({} chunks, category {:?})",
                    report.filename,
                    count,
                    report.category
                );
            }
            Err(e) => report.fail(&e),
        }
        report
    }

    async fn embed_chunks(
        &self,
        document_id: Uuid,
        chunks: Vec<Chunk>,
    ) -> Result<(usize, Option<String>)> {
        if chunks.is_empty() {
            // Still drops entries left over from an earlier version
            let index = Arc::clone(&self.index);
            let count = tokio::task::spawn_blocking(move || index.replace_document(document_id, Vec::new()))
                .await??;
            return Ok((count, None));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let timeout = Duration::from_secs(self.config.processing.document_timeout_secs);

        // A second pass only happens when the session switched providers mid-embed
        for _ in 0..2 {
            let embedded = tokio::time::timeout(timeout, self.embeddings.embed_texts(&texts))
                .await
                .map_err(|_| Error::provider_timeout(self.embeddings.active_name(), timeout))??;

            let entries = chunks
                .iter()
                .cloned()
                .zip(embedded.vectors)
                .map(|(chunk, vector)| IndexEntry::new(chunk, vector))
                .collect();

            let route = embedded.route;
            if let Some(count) = self.embeddings.commit(route, document_id, entries).await? {
                let name = self.embeddings.provider(route).name().to_string();
                return Ok((count, Some(name)));
            }
            tracing::info!(
                "Session switched to '{}' while embedding; re-embedding document {}",
                self.embeddings.active_name(),
                document_id
            );
        }

        Err(Error::internal(format!(
            "Embedding provider changed repeatedly while indexing document {}",
            document_id
        )))
    }

    // ==================== Query ====================

    /// Answer a question; the token aborts retrieval or synthesis
    ///
    /// When generation fails and `llm.degraded_answers` is set, the raw
    /// retrieved passages come back as a degraded answer instead of an error.
    pub async fn query(&self, request: QueryRequest, cancel: &CancellationToken) -> Result<QueryOutcome> {
        let started = Instant::now();
        let mut trace = QueryTrace::new();

        match self.run_query(&request, cancel, &mut trace).await {
            Ok((answer, retrieved)) => {
                trace.enter(QueryStage::Answered);
                Ok(QueryOutcome {
                    answer,
                    retrieved,
                    stages: trace.into_stages(),
                    provider: self.embeddings.active_name(),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                trace.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_query(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
        trace: &mut QueryTrace,
    ) -> Result<(Answer, usize)> {
        request.validate()?;

        let k = request.k.unwrap_or(self.config.retrieval.top_k);
        let min_score = request.min_score.unwrap_or(self.config.retrieval.min_score);
        let filter = IndexFilter {
            category: request.category,
            ..IndexFilter::default()
        };

        trace.enter(QueryStage::Retrieving);
        let retrieval = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.retriever.retrieve(&request.question, &filter, k, min_score) => result?,
        };

        trace.enter(QueryStage::Synthesizing);
        let synthesized = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.synthesizer.synthesize(&request.question, &retrieval) => result,
        };

        let answer = match synthesized {
            Ok(answer) => answer,
            Err(Error::GenerationUnavailable(reason)) if self.config.llm.degraded_answers => {
                tracing::warn!("Generation unavailable ({}); answering with retrieved passages", reason);
                Answer::from_retrieval_only(&retrieval)
            }
            Err(e) => return Err(e),
        };

        Ok((answer, retrieval.len()))
    }

    // ==================== Administration ====================

    /// Remove one category's chunks, or everything when `category` is None
    pub async fn clear(&self, category: Option<ProductCategory>) -> Result<usize> {
        let filter = IndexFilter {
            category,
            ..IndexFilter::default()
        };
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || index.clear(&filter)).await?
    }

    /// Document and chunk counts plus the active provider
    pub fn status(&self) -> PipelineStatus {
        let all = IndexFilter::all();
        PipelineStatus {
            document_count: self.index.document_count(&all),
            chunk_count: self.index.count(&all),
            active_provider: self.embeddings.active_name(),
            degraded: self.embeddings.is_degraded(),
            index_dimensions: self.index.dimensions(),
        }
    }

    /// Categories present in the index with their operator hints
    pub fn categories(&self) -> Vec<CategorySummary> {
        self.index
            .categories()
            .into_iter()
            .map(|(category, chunk_count)| CategorySummary {
                category,
                display_name: category.display_name().to_string(),
                help_text: category.help_text().to_string(),
                chunk_count,
            })
            .collect()
    }

    /// Check the active embedding provider and the generator
    pub async fn health(&self) -> ProviderHealth {
        let embedder = self.embeddings.active();
        let (embedding_ok, llm_ok) =
            tokio::join!(embedder.health_check(), self.llm.health_check());

        ProviderHealth {
            embedding_provider: embedder.name().to_string(),
            embedding_ok: embedding_ok.unwrap_or(false),
            llm_provider: self.llm.name().to_string(),
            llm_model: self.llm.model().to_string(),
            llm_ok: llm_ok.unwrap_or(false),
        }
    }
}
