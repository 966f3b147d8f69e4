//! REST API handlers for the tool server

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sett_core::GraphReader;
use sett_indexer::PassScope;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::protocol::{self, ToolInfo, ToolRequest, ToolResponse, TOOLS};
use crate::ServerState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub nodes: Option<usize>,
    pub edges: Option<usize>,
}

/// Body of `POST /api/index`.
#[derive(Debug, Default, Deserialize)]
pub struct IndexRequest {
    #[serde(default)]
    pub full: bool,
    /// Rebind the namespace to this workspace if it belongs to another.
    #[serde(default)]
    pub confirm: bool,
    /// Restrict the pass to these paths; ignored when `full` is set.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

fn respond(outcome: Result<Value, ToolError>) -> (StatusCode, Json<ToolResponse>) {
    match outcome {
        Ok(result) => (StatusCode::OK, Json(ToolResponse::success(result))),
        Err(e) => (e.status(), Json(ToolResponse::failure(&e))),
    }
}

/// `POST /api/tools` with a full request envelope.
pub async fn call_tool(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ToolRequest>,
) -> impl IntoResponse {
    respond(protocol::call(&state.tools, &request.tool, request.arguments).await)
}

/// `POST /api/tools/:name` with the arguments as the body.
pub async fn call_named_tool(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    arguments: Option<Json<Value>>,
) -> impl IntoResponse {
    let arguments = arguments.map(|Json(v)| v).unwrap_or(Value::Null);
    respond(protocol::call(&state.tools, &name, arguments).await)
}

pub async fn list_tools() -> Json<&'static [ToolInfo]> {
    Json(TOOLS)
}

/// Manual indexing trigger; the only mutating route.
pub async fn trigger_index(
    State(state): State<Arc<ServerState>>,
    request: Option<Json<IndexRequest>>,
) -> impl IntoResponse {
    let Some(indexer) = state.indexer.clone() else {
        let err = ToolError::NotFound("indexing is not enabled on this server".into());
        return respond(Err(err));
    };
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let scope = if request.full || request.paths.is_empty() {
        PassScope::Full
    } else {
        PassScope::Paths(request.paths)
    };
    info!("Index requested over HTTP ({:?})", scope);

    let outcome = match indexer.run(scope, request.confirm).await {
        Ok(report) => serde_json::to_value(report)
            .map_err(|e| ToolError::InvalidArgument(e.to_string())),
        Err(e) => {
            warn!("Requested pass failed: {}", e);
            Err(ToolError::Index(e))
        }
    };
    respond(outcome)
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stats = state.tools.store().stats().await;
    let (status, nodes, edges) = match stats {
        Ok(s) => ("ok", Some(s.nodes), Some(s.edges)),
        Err(e) => {
            warn!("Health check could not reach the store: {}", e);
            ("degraded", None, None)
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        nodes,
        edges,
    })
}
