//! Query endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::processing::QueryOutcome;
use crate::server::state::AppState;
use crate::types::QueryRequest;

/// Query body; a `request_id` makes the query cancellable
#[derive(Debug, Deserialize)]
pub struct QueryBody {
    #[serde(flatten)]
    pub request: QueryRequest,
    #[serde(default)]
    pub request_id: Option<Uuid>,
}

/// Unregisters a query even when the client disconnects mid-request
///
/// Only built after registration succeeded, so it owns the entry for `id`.
struct InflightGuard<'a> {
    state: &'a AppState,
    id: Uuid,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.state.finish_query(&self.id);
    }
}

/// POST /api/query - Answer a question with sources
pub async fn query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryOutcome>> {
    tracing::info!("Query: \"{}\" (category: {:?})", body.request.question, body.request.category);

    let outcome = match body.request_id {
        Some(id) => {
            let token = state.register_query(id)?;
            let _guard = InflightGuard { state: &state, id };
            state.pipeline().query(body.request, &token).await
        }
        None => {
            state
                .pipeline()
                .query(body.request, &CancellationToken::new())
                .await
        }
    }?;

    tracing::info!(
        "Answered in {}ms from {} sources",
        outcome.duration_ms,
        outcome.answer.sources.len()
    );
    Ok(Json(outcome))
}

/// POST /api/query/:id/cancel - Cancel an in-flight query
pub async fn cancel_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<serde_json::Value>) {
    if state.cancel_query(&id) {
        tracing::info!("Cancelled query {}", id);
        (StatusCode::ACCEPTED, Json(json!({ "cancelled": true })))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "cancelled": false })))
    }
}
