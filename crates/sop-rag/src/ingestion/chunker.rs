//! Text chunking with page tracking and exact overlap

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};
use crate::types::{Chunk, Document, ProductCategory};

/// Break preference, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Whitespace,
}

const BOUNDARY_ORDER: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Whitespace,
];

/// Text chunker with configurable size and overlap, both in chars
///
/// Every chunk is an exact slice of `Document::full_text()`. Chunk `i > 0`
/// begins `overlap` chars before the end of chunk `i - 1`, so dropping those
/// leading chars from each later chunk and concatenating rebuilds the text.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Maximum chunk size in characters
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".to_string()));
        }
        if overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk a document, tagging every chunk with `category`
    ///
    /// Blank documents yield no chunks.
    pub fn chunk_document(&self, doc: &Document, category: ProductCategory) -> Vec<Chunk> {
        if doc.is_blank() {
            return Vec::new();
        }

        let chars: Vec<char> = doc.full_text().chars().collect();
        let page_offsets = doc.page_offsets();
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut chunk_index = 0u32;

        loop {
            let end = if total - start <= self.chunk_size {
                total
            } else {
                self.find_break(&chars, start)
            };

            chunks.push(Chunk {
                id: Chunk::stable_id(&doc.id, chunk_index),
                document_id: doc.id,
                source_name: doc.filename.clone(),
                content: chars[start..end].iter().collect(),
                chunk_index,
                page_start: page_at(&page_offsets, start),
                page_end: page_at(&page_offsets, end - 1),
                category,
                char_start: start,
                char_end: end,
                overlap_chars: if chunk_index == 0 { 0 } else { self.overlap },
            });

            if end == total {
                break;
            }

            start = end - self.overlap;
            chunk_index += 1;
        }

        chunks
    }

    /// Pick the end of the chunk starting at `start`
    ///
    /// Searches `[lo, start + chunk_size]` for the last boundary of the best
    /// available kind; `lo` keeps chunks from collapsing and guarantees the
    /// next start moves forward.
    fn find_break(&self, chars: &[char], start: usize) -> usize {
        let limit = start + self.chunk_size;
        let lo = start + (self.overlap + 1).max(self.chunk_size / 2);

        for boundary in BOUNDARY_ORDER {
            if let Some(pos) = last_boundary(chars, start, lo, limit, boundary) {
                return pos;
            }
        }

        limit
    }
}

/// Last break position `p` with `lo <= p <= limit` for the given boundary kind
///
/// A break position is the end (exclusive) of the chunk, placed after the
/// separator so separators stay with the preceding text.
fn last_boundary(
    chars: &[char],
    start: usize,
    lo: usize,
    limit: usize,
    boundary: Boundary,
) -> Option<usize> {
    match boundary {
        Boundary::Paragraph => (lo..=limit)
            .rev()
            .find(|&p| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n'),
        Boundary::Line => (lo..=limit).rev().find(|&p| chars[p - 1] == '\n'),
        Boundary::Sentence => {
            let window: String = chars[start..limit].iter().collect();
            let mut best = None;
            for (byte_idx, _) in window.split_sentence_bound_indices() {
                if byte_idx == 0 {
                    continue;
                }
                let pos = start + window[..byte_idx].chars().count();
                if pos >= lo && pos < limit && ends_sentence(chars, pos) {
                    best = Some(pos);
                }
            }
            best
        }
        Boundary::Whitespace => (lo..=limit).rev().find(|&p| chars[p - 1].is_whitespace()),
    }
}

/// Sentence bounds also fire on bare line ends; require terminal punctuation
fn ends_sentence(chars: &[char], pos: usize) -> bool {
    chars[..pos]
        .iter()
        .rev()
        .find(|c| !c.is_whitespace())
        .map_or(false, |c| matches!(c, '.' | '!' | '?' | ';' | ':'))
}

/// Page containing char position `pos`
fn page_at(page_offsets: &[(usize, u32)], pos: usize) -> u32 {
    page_offsets
        .iter()
        .take_while(|(offset, _)| *offset <= pos)
        .last()
        .map(|(_, page)| *page)
        .unwrap_or(1)
}
