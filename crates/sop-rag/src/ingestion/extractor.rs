//! Text extraction seam
//!
//! Raw file-format parsing lives outside this crate; anything that can turn
//! bytes into page-tagged text plugs in through `TextExtractor`.

use crate::error::{Error, Result};
use crate::types::PageText;

/// Form feed, the page break emitted by `pdftotext` and most text dumps
const PAGE_BREAK: char = '\u{000C}';

/// Turns raw file bytes into page-tagged text
pub trait TextExtractor: Send + Sync {
    /// Extract pages; fails with `ExtractionFailed` for unreadable input
    fn extract(&self, filename: &str, data: &[u8]) -> Result<Vec<PageText>>;
}

/// Extractor for UTF-8 text dumps with form-feed page breaks
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, filename: &str, data: &[u8]) -> Result<Vec<PageText>> {
        if data.starts_with(b"%PDF") {
            let message = if contains(data, b"/Encrypt") {
                "document is encrypted"
            } else {
                "binary PDF content needs a PDF text extractor"
            };
            return Err(Error::extraction(filename, message));
        }
        if data.contains(&0) {
            return Err(Error::extraction(filename, "binary content is not text"));
        }

        let text = std::str::from_utf8(data)
            .map_err(|e| Error::extraction(filename, format!("invalid UTF-8: {}", e)))?;

        Ok(text
            .split(PAGE_BREAK)
            .enumerate()
            .map(|(i, page)| PageText::new(i as u32 + 1, page))
            .collect())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
