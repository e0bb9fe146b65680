//! Application state for the RAG server

use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::processing::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Ingestion and query pipeline
    pipeline: Pipeline,
    /// Cancellation handles of queries that carry a request ID
    inflight: DashMap<Uuid, CancellationToken>,
}

impl AppState {
    /// Build state from configuration (opens the index, connects providers)
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!("Initializing RAG application state...");
        let pipeline = Pipeline::from_config(config).await?;

        let status = pipeline.status();
        tracing::info!(
            "Index holds {} documents / {} chunks (provider: {}{})",
            status.document_count,
            status.chunk_count,
            status.active_provider,
            if status.degraded { ", degraded" } else { "" }
        );

        Ok(Self::from_pipeline(pipeline))
    }

    /// Wrap an already assembled pipeline
    pub fn from_pipeline(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                pipeline,
                inflight: DashMap::new(),
            }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Register a cancellable query; an ID still in flight is refused
    pub fn register_query(&self, request_id: Uuid) -> Result<CancellationToken> {
        match self.inner.inflight.entry(request_id) {
            Entry::Occupied(_) => Err(Error::DuplicateRequest(request_id)),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    pub fn finish_query(&self, request_id: &Uuid) {
        self.inner.inflight.remove(request_id);
    }

    /// Cancel a running query; false when it is unknown or already done
    pub fn cancel_query(&self, request_id: &Uuid) -> bool {
        match self.inner.inflight.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn inflight_queries(&self) -> usize {
        self.inner.inflight.len()
    }
}
