//! SOP RAG server binary
//!
//! Run with: cargo run -p sop-rag --bin sop-rag-server

use sop_rag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sop_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RagConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Embedding model: {} ({} dims)", config.embeddings.model, config.embeddings.dimensions);
    tracing::info!(
        "  - Fallback embeddings: {} ({} dims, cached in {})",
        config.embeddings.fallback_model,
        config.embeddings.fallback_dimensions,
        config.embeddings.fallback_cache_dir.display()
    );
    tracing::info!("  - LLM model: {}", config.llm.generate_model);
    tracing::info!("  - Chunk size: {} (overlap {})", config.chunking.chunk_size, config.chunking.chunk_overlap);
    tracing::info!("  - Index: {}", config.index.path.display());

    let server = RagServer::new(config).await?;

    let health = server.state().pipeline().health().await;
    if !health.embedding_ok || !health.llm_ok {
        tracing::warn!("Ollama not reachable; embeddings will fall back to the local model");
        tracing::warn!("  Start it with: ollama serve");
        tracing::warn!("  Pull models: ollama pull nomic-embed-text && ollama pull llama3.2:3b");
    }

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
