//! Orchestration: provider fallback, job tracking, and the pipeline itself

mod fallback;
mod job;
mod pipeline;

pub use fallback::{Embedded, EmbeddingRouter, Route};
pub use job::{
    BatchReport, FailureKind, IngestReport, IngestStage, QueryOutcome, QueryStage,
};
pub use pipeline::{CategorySummary, FileUpload, Pipeline, ProviderHealth};
