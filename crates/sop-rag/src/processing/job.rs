//! Per-document ingestion and per-query state tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::types::{Answer, CategoryMatch, ProductCategory};

/// Why a job ended in `Failed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExtractionFailed,
    ProviderUnavailable,
    ProviderTimeout,
    DimensionMismatch,
    StoreUnavailable,
    GenerationUnavailable,
    InvalidQuery,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::ExtractionFailed { .. } => Self::ExtractionFailed,
            Error::ProviderUnavailable { .. } => Self::ProviderUnavailable,
            Error::ProviderTimeout { .. } => Self::ProviderTimeout,
            Error::DimensionMismatch { .. } => Self::DimensionMismatch,
            Error::StoreUnavailable(_) => Self::StoreUnavailable,
            Error::GenerationUnavailable(_) => Self::GenerationUnavailable,
            Error::InvalidQuery(_) | Error::DuplicateRequest(_) => Self::InvalidQuery,
            Error::Cancelled => Self::Cancelled,
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => Self::Internal,
        }
    }
}

/// Ingestion state: `Received -> Chunking -> Embedding -> Indexed | Failed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "stage", content = "reason")]
pub enum IngestStage {
    Received,
    Chunking,
    Embedding,
    Indexed,
    Failed(FailureKind),
}

impl IngestStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Indexed | Self::Failed(_))
    }
}

/// Outcome of ingesting one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub filename: String,
    pub document_id: Option<Uuid>,
    /// Final stage reached
    pub stage: IngestStage,
    /// Every stage entered, in order
    pub transitions: Vec<IngestStage>,
    pub category: Option<ProductCategory>,
    pub category_confidence: f32,
    pub chunk_count: usize,
    /// Provider that embedded the chunks
    pub provider: Option<String>,
    /// Non-fatal issues such as empty extraction
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl IngestReport {
    pub fn received(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            document_id: None,
            stage: IngestStage::Received,
            transitions: vec![IngestStage::Received],
            category: None,
            category_confidence: 0.0,
            chunk_count: 0,
            provider: None,
            warnings: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Move to the next stage; terminal stages are final
    pub fn advance(&mut self, stage: IngestStage) {
        if self.stage.is_terminal() {
            return;
        }
        tracing::debug!("{}: {:?} -> {:?}", self.filename, self.stage, stage);
        self.stage = stage;
        self.transitions.push(stage);
    }

    pub fn set_category(&mut self, detected: CategoryMatch) {
        self.category = Some(detected.category);
        self.category_confidence = detected.confidence;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}: {}", self.filename, message);
        self.warnings.push(message);
    }

    pub fn fail(&mut self, err: &Error) {
        tracing::error!("Failed to ingest {}: {}", self.filename, err);
        self.error = Some(err.to_string());
        self.advance(IngestStage::Failed(FailureKind::from_error(err)));
    }

    pub fn is_indexed(&self) -> bool {
        self.stage == IngestStage::Indexed
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.stage, IngestStage::Failed(_))
    }
}

/// Summary of a batch ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per-document reports in submission order
    pub documents: Vec<IngestReport>,
    pub indexed: usize,
    pub failed: usize,
    pub total_chunks: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn from_reports(documents: Vec<IngestReport>, duration_ms: u64) -> Self {
        let indexed = documents.iter().filter(|r| r.is_indexed()).count();
        let failed = documents.iter().filter(|r| r.is_failed()).count();
        let total_chunks = documents.iter().map(|r| r.chunk_count).sum();
        Self {
            documents,
            indexed,
            failed,
            total_chunks,
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    /// Count of documents that ended with `kind`
    pub fn count_failed(&self, kind: FailureKind) -> usize {
        self.documents
            .iter()
            .filter(|r| r.stage == IngestStage::Failed(kind))
            .count()
    }
}

/// Query state: `Received -> Retrieving -> Synthesizing -> Answered | Failed`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "stage", content = "reason")]
pub enum QueryStage {
    Received,
    Retrieving,
    Synthesizing,
    Answered,
    Failed(FailureKind),
}

/// A completed query with its trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub answer: Answer,
    /// Chunks returned by retrieval before the context budget
    pub retrieved: usize,
    pub stages: Vec<QueryStage>,
    /// Embedding provider used for the query
    pub provider: String,
    pub duration_ms: u64,
}

/// Tracks query stage transitions
#[derive(Debug, Clone)]
pub(crate) struct QueryTrace {
    stages: Vec<QueryStage>,
}

impl QueryTrace {
    pub(crate) fn new() -> Self {
        Self {
            stages: vec![QueryStage::Received],
        }
    }

    pub(crate) fn enter(&mut self, stage: QueryStage) {
        self.stages.push(stage);
    }

    /// Record the terminal failure and log the path that led to it
    pub(crate) fn fail(&mut self, err: &Error) {
        self.stages.push(QueryStage::Failed(FailureKind::from_error(err)));
        tracing::warn!(stages = ?self.stages, "Query failed: {}", err);
    }

    pub(crate) fn into_stages(self) -> Vec<QueryStage> {
        self.stages
    }
}
