//! Document and chunk types with provenance tracking for attribution

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::category::ProductCategory;

/// Namespace for document IDs derived from source names
const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x5a0f_3c1e_8d2b_4f6a_9e7c_1b3d_5f7a_9c2e);

/// Separator placed between pages when a document is flattened
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Text extracted from one page of a source file (1-indexed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// A document ready for chunking
///
/// Documents are immutable once chunked; re-ingesting the same source name
/// produces the same `id` and supersedes the earlier entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable document ID (UUID v5 of the source name unless overridden)
    pub id: Uuid,
    /// Original filename as uploaded
    pub filename: String,
    /// Product category supplied by the caller, if any
    pub category: Option<ProductCategory>,
    /// Page-tagged extracted text
    pub pages: Vec<PageText>,
    /// SHA-256 of the flattened text
    pub content_hash: String,
}

impl Document {
    /// Create a document whose ID is derived from its filename
    pub fn new(filename: impl Into<String>, pages: Vec<PageText>) -> Self {
        let filename = filename.into();
        let id = Uuid::new_v5(&DOCUMENT_NAMESPACE, filename.as_bytes());
        Self::with_id(id, filename, pages)
    }

    /// Create a document with an explicit ID
    pub fn with_id(id: Uuid, filename: impl Into<String>, pages: Vec<PageText>) -> Self {
        let mut doc = Self {
            id,
            filename: filename.into(),
            category: None,
            pages,
            content_hash: String::new(),
        };
        doc.content_hash = hash_text(&doc.full_text());
        doc
    }

    /// Single-page document from plain text
    pub fn from_text(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(filename, vec![PageText::new(1, text)])
    }

    /// Set the caller-supplied category
    pub fn with_category(mut self, category: ProductCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// All pages joined by `PAGE_SEPARATOR`
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(PAGE_SEPARATOR)
    }

    /// Char offset (inclusive start) of each page inside `full_text()`
    pub fn page_offsets(&self) -> Vec<(usize, u32)> {
        let sep_len = PAGE_SEPARATOR.chars().count();
        let mut offsets = Vec::with_capacity(self.pages.len());
        let mut pos = 0usize;
        for (i, page) in self.pages.iter().enumerate() {
            if i > 0 {
                pos += sep_len;
            }
            offsets.push((pos, page.page_number));
            pos += page.text.chars().count();
        }
        offsets
    }

    /// Whether extraction produced no usable text
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// A contiguous slice of a document's text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable chunk ID derived from (document_id, chunk_index)
    pub id: Uuid,
    /// Parent document ID
    pub document_id: Uuid,
    /// Source filename (used in attribution)
    pub source_name: String,
    /// Text content, an exact slice of the document text
    pub content: String,
    /// Sequence index within the document
    pub chunk_index: u32,
    /// First page covered
    pub page_start: u32,
    /// Last page covered
    pub page_end: u32,
    /// Product category of the parent document
    pub category: ProductCategory,
    /// Char position in the flattened document
    pub char_start: usize,
    pub char_end: usize,
    /// Leading chars shared with the previous chunk
    pub overlap_chars: usize,
}

impl Chunk {
    /// Stable ID for the chunk at `chunk_index` of `document_id`
    pub fn stable_id(document_id: &Uuid, chunk_index: u32) -> Uuid {
        Uuid::new_v5(document_id, chunk_index.to_string().as_bytes())
    }

    /// Pages covered, inclusive
    pub fn pages(&self) -> Vec<u32> {
        (self.page_start..=self.page_end).collect()
    }

    /// Format source for display
    pub fn format_source(&self) -> String {
        if self.page_start == self.page_end {
            format!("{}, Page {}", self.source_name, self.page_start)
        } else {
            format!("{}, Pages {}-{}", self.source_name, self.page_start, self.page_end)
        }
    }
}

/// Rebuild the flattened text from chunks in sequence order
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    for chunk in chunks {
        text.extend(chunk.content.chars().skip(chunk.overlap_chars));
    }
    text
}
