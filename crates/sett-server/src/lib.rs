//! HTTP tool server over the code graph

pub mod error;
pub mod handlers;
pub mod protocol;
pub mod router;
pub mod tools;


use std::sync::Arc;

use sett_core::{Embedder, GraphStore};
use sett_indexer::{Indexer, ServerConfig};
use tracing::info;

pub use error::ToolError;
pub use protocol::{ToolRequest, ToolResponse, TOOLS, dispatch};
pub use router::create_router;
pub use tools::Tools;

/// Shared state behind every route.
pub struct ServerState {
    pub tools: Tools,
    /// Present when the server may trigger passes itself.
    pub indexer: Option<Arc<Indexer>>,
}

impl ServerState {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            tools: Tools::new(store, embedder),
            indexer: None,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }
}

pub struct SettServer {
    state: Arc<ServerState>,
    config: ServerConfig,
}

impl SettServer {
    pub fn new(state: ServerState, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(state),
            config,
        }
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Bind and serve until the process exits.
    pub async fn start(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Tool server listening on http://{}", addr);
        axum::serve(listener, create_router(self.state)).await?;
        Ok(())
    }
}
