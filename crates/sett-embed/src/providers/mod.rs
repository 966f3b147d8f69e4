//! Embedding provider implementations

pub mod local;
pub mod openai;

use std::sync::Arc;

use sett_core::Embedder;
use sett_indexer::{EmbeddingConfig, EmbeddingProvider};
use tracing::info;

/// Build the configured embedder; `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Local => {
            info!("Using local feature-hashing embedder ({} dims)", config.dimensions);
            Some(Arc::new(local::LocalEmbedder::new(config.dimensions)))
        }
        EmbeddingProvider::OpenAi => {
            info!("Using embedding endpoint {} with model {}", config.endpoint, config.model);
            Some(Arc::new(openai::OpenAiEmbedder::new(
                &config.endpoint,
                &config.model,
                config.dimensions,
                config.api_key.clone(),
            )))
        }
        EmbeddingProvider::None => {
            info!("Embeddings disabled; semantic search is unavailable");
            None
        }
    }
}
