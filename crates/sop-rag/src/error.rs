//! Error types for the RAG pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for RAG operations
pub type Result<T> = std::result::Result<T, Error>;

/// RAG pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Text extraction failed for a single document (encrypted, corrupt, unreadable)
    #[error("Failed to extract text from '{filename}': {message}")]
    ExtractionFailed { filename: String, message: String },

    /// Embedding or generation provider unreachable (network, auth, quota)
    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Provider call exceeded its deadline
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    /// Vectors of one dimensionality offered to an index holding another
    #[error("Dimension mismatch: index holds {expected}-dim vectors from '{index_provider}', got {actual}-dim vectors from '{provider}'")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        index_provider: String,
        provider: String,
    },

    /// Persisted index cannot be read or written
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// Text generation failed; retrieved chunks may still be surfaced
    #[error("Answer generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Question rejected before retrieval
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Query cancelled by the caller
    #[error("Query cancelled")]
    Cancelled,

    /// A query with this request ID is still running
    #[error("Query {0} is already in flight")]
    DuplicateRequest(uuid::Uuid),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error
    pub fn extraction(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a provider-unavailable error
    pub fn provider_unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a provider-timeout error
    pub fn provider_timeout(provider: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::ProviderTimeout {
            provider: provider.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that move the embedding path onto the fallback provider
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable { .. } | Error::ProviderTimeout { .. }
        )
    }

    /// Errors a caller can reasonably retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable { .. }
                | Error::ProviderTimeout { .. }
                | Error::GenerationUnavailable(_)
                | Error::Cancelled
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Task join error: {}", err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
            Error::ExtractionFailed { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
            Error::ProviderUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable"),
            Error::ProviderTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "provider_timeout"),
            Error::DimensionMismatch { .. } => (StatusCode::CONFLICT, "dimension_mismatch"),
            Error::StoreUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable"),
            Error::GenerationUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "generation_unavailable"),
            Error::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "invalid_query"),
            Error::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled"),
            Error::DuplicateRequest(_) => (StatusCode::CONFLICT, "duplicate_request"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            Error::Json(_) => (StatusCode::BAD_REQUEST, "json_error"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "retryable": self.is_retryable(),
            }
        }));

        (status, body).into_response()
    }
}
