//! Document ingestion endpoint

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::processing::{BatchReport, FileUpload, IngestReport};
use crate::server::state::AppState;
use crate::types::ProductCategory;

/// Page separator understood by the plain-text extractor
const FORM_FEED: &str = "\u{000C}";

/// One document in an ingest request
#[derive(Debug, Deserialize)]
pub struct IngestDocument {
    pub filename: String,
    /// Whole text; form feeds mark page breaks
    #[serde(default)]
    pub text: Option<String>,
    /// Text per page, page 1 first
    #[serde(default)]
    pub pages: Option<Vec<String>>,
    #[serde(default)]
    pub category: Option<ProductCategory>,
}

/// Entries stay raw so each one is validated on its own
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub documents: Vec<Value>,
}

impl IngestDocument {
    fn into_upload(self) -> Result<FileUpload> {
        let text = match (self.text, self.pages) {
            (Some(text), None) => text,
            (None, Some(pages)) => pages.join(FORM_FEED),
            _ => {
                return Err(Error::extraction(
                    self.filename,
                    "provide exactly one of 'text' or 'pages'",
                ))
            }
        };

        Ok(FileUpload {
            filename: self.filename,
            data: text.into_bytes(),
            category: self.category,
        })
    }
}

/// Parse the entry at `position`; a malformed one becomes its failed report
fn parse_entry(position: usize, entry: Value) -> std::result::Result<FileUpload, IngestReport> {
    let filename = entry
        .get("filename")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("document {}", position + 1));

    serde_json::from_value::<IngestDocument>(entry)
        .map_err(|e| Error::extraction(filename.as_str(), format!("malformed entry: {}", e)))
        .and_then(IngestDocument::into_upload)
        .map_err(|e| {
            let mut report = IngestReport::received(filename);
            report.fail(&e);
            report
        })
}

/// POST /api/ingest - Ingest a batch and report per-document status
pub async fn ingest_documents(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<BatchReport>> {
    if request.documents.is_empty() {
        return Err(Error::Config("No documents provided".to_string()));
    }

    // `None` marks a slot filled by the pipeline, in submission order
    let mut slots = Vec::with_capacity(request.documents.len());
    let mut uploads = Vec::new();
    for (position, entry) in request.documents.into_iter().enumerate() {
        match parse_entry(position, entry) {
            Ok(upload) => {
                uploads.push(upload);
                slots.push(None);
            }
            Err(report) => slots.push(Some(report)),
        }
    }

    tracing::info!(
        "Ingest request with {} documents ({} malformed)",
        slots.len(),
        slots.len() - uploads.len()
    );

    let batch = state.pipeline().ingest_files(uploads).await;
    let mut ingested = batch.documents.into_iter();
    let documents = slots
        .into_iter()
        .filter_map(|slot| slot.or_else(|| ingested.next()))
        .collect();

    Ok(Json(BatchReport::from_reports(documents, batch.duration_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{FailureKind, IngestStage};
    use serde_json::json;

    #[test]
    fn test_pages_are_joined_with_form_feed() {
        let doc = IngestDocument {
            filename: "guide.txt".to_string(),
            text: None,
            pages: Some(vec!["one".to_string(), "two".to_string()]),
            category: Some(ProductCategory::Milestone),
        };
        let upload = doc.into_upload().unwrap();
        assert_eq!(upload.data, b"one\x0ctwo");
        assert_eq!(upload.category, Some(ProductCategory::Milestone));
    }

    #[test]
    fn test_text_and_pages_are_exclusive() {
        let doc = IngestDocument {
            filename: "guide.txt".to_string(),
            text: Some("a".to_string()),
            pages: Some(vec!["b".to_string()]),
            category: None,
        };
        assert!(matches!(doc.into_upload(), Err(Error::ExtractionFailed { .. })));
    }

    #[test]
    fn test_malformed_entry_becomes_failed_report() {
        let report = parse_entry(0, json!({ "filename": "a.txt" })).unwrap_err();
        assert_eq!(report.filename, "a.txt");
        assert_eq!(report.stage, IngestStage::Failed(FailureKind::ExtractionFailed));

        let report = parse_entry(2, json!({ "text": "no name", "category": 7 })).unwrap_err();
        assert_eq!(report.filename, "document 3");
        assert!(report.error.unwrap().contains("malformed entry"));

        assert!(parse_entry(1, json!({ "filename": "b.txt", "text": "ok" })).is_ok());
    }
}
