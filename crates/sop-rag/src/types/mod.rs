//! Core types for the RAG pipeline

pub mod category;
pub mod document;
pub mod query;
pub mod response;

pub use category::{CategoryMatch, ProductCategory};
pub use document::{reconstruct, Chunk, Document, PageText};
pub use query::QueryRequest;
pub use response::{Answer, PipelineStatus, RetrievalResult, ScoredChunk, SourceRef};
