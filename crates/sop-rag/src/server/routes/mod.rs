//! API routes for the RAG server

pub mod admin;
pub mod ingest;
pub mod query;

use axum::{
    routing::{get, post},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Ingestion
        .route("/ingest", post(ingest::ingest_documents))
        // Query
        .route("/query", post(query::query))
        .route("/query/:id/cancel", post(query::cancel_query))
        // Administration
        .route("/clear", post(admin::clear))
        .route("/status", get(admin::status))
        .route("/categories", get(admin::categories))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "sop-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Question answering over SOPs and product manuals with source attribution",
        "endpoints": {
            "POST /api/ingest": "Ingest documents ({documents: [{filename, text | pages, category?}]})",
            "POST /api/query": "Ask a question ({question, category?, k?, min_score?, request_id?})",
            "POST /api/query/:id/cancel": "Cancel an in-flight query",
            "POST /api/clear": "Clear one category or the whole index ({category} or {all: true})",
            "GET /api/status": "Document/chunk counts and active embedding provider",
            "GET /api/categories": "Product categories with query hints"
        }
    }))
}
