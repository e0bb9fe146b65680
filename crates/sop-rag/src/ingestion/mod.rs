//! Document ingestion: extraction seam, category detection, chunking

pub mod category;
mod chunker;
pub mod extractor;

pub use category::{detect_category, CategoryDetector, KeywordCategoryDetector};
pub use chunker::TextChunker;
pub use extractor::{PlainTextExtractor, TextExtractor};
