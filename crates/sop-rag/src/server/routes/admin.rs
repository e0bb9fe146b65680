//! Administrative endpoints: status, categories, clear

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::processing::CategorySummary;
use crate::server::state::AppState;
use crate::types::{PipelineStatus, ProductCategory};

/// Exactly one of `category` or `all: true`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClearRequest {
    #[serde(default)]
    pub category: Option<ProductCategory>,
    #[serde(default)]
    pub all: bool,
}

impl ClearRequest {
    /// Category filter to clear; `None` clears everything
    pub fn scope(&self) -> Result<Option<ProductCategory>> {
        match (self.category, self.all) {
            (Some(category), false) => Ok(Some(category)),
            (None, true) => Ok(None),
            (Some(_), true) => Err(Error::InvalidQuery(
                "Pass either 'category' or 'all', not both".to_string(),
            )),
            (None, false) => Err(Error::InvalidQuery(
                "Clear needs a 'category' or \"all\": true".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
    pub status: PipelineStatus,
}

/// Every category with its hint, plus which ones hold documents
#[derive(Debug, Serialize)]
pub struct CategoriesResponse {
    pub indexed: Vec<CategorySummary>,
    pub available: Vec<CategoryHint>,
}

#[derive(Debug, Serialize)]
pub struct CategoryHint {
    pub category: ProductCategory,
    pub display_name: &'static str,
    pub help_text: &'static str,
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(state.pipeline().status())
}

/// GET /api/categories
pub async fn categories(State(state): State<AppState>) -> Json<CategoriesResponse> {
    let available = ProductCategory::ALL
        .iter()
        .map(|c| CategoryHint {
            category: *c,
            display_name: c.display_name(),
            help_text: c.help_text(),
        })
        .collect();

    Json(CategoriesResponse {
        indexed: state.pipeline().categories(),
        available,
    })
}

/// POST /api/clear
pub async fn clear(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> Result<Json<ClearResponse>> {
    let category = request.scope()?;
    let removed = state.pipeline().clear(category).await?;
    Ok(Json(ClearResponse {
        removed,
        status: state.pipeline().status(),
    }))
}
