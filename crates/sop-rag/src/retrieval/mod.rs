//! Vector index and query-time retrieval

mod index;
mod retriever;

pub use index::{cosine_similarity, IndexEntry, IndexFilter, VectorIndex};
pub use retriever::Retriever;
