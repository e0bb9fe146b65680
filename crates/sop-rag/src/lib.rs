//! sop-rag: question answering over SOPs and product manuals
//!
//! Documents are chunked with page and product provenance, embedded into a
//! persistent vector index, and queried through a retrieve-then-synthesize
//! pipeline that attributes every answer to its source chunks. When the
//! remote embedding provider is down the pipeline falls back to a local
//! model for the rest of the session.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use processing::{BatchReport, FileUpload, IngestReport, IngestStage, Pipeline, QueryOutcome};
pub use retrieval::{IndexFilter, VectorIndex};
pub use types::{
    Answer, Chunk, Document, PageText, PipelineStatus, ProductCategory, QueryRequest,
    RetrievalResult,
};
