//! Axum router setup for the tool server

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::{
    ServerState,
    handlers::{call_named_tool, call_tool, health_check, list_tools, trigger_index},
};

/// Create the axum router with all routes
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/tools", get(list_tools).post(call_tool))
        .route("/api/tools/:name", post(call_named_tool))
        .route("/api/index", post(trigger_index))
        .route("/api/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
