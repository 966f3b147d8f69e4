//! Tool layer errors

use axum::http::StatusCode;
use sett_core::{EmbedError, StoreError};
use sett_indexer::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl ToolError {
    /// Stable tag carried in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::InvalidArgument(_) => "invalid_argument",
            ToolError::NotFound(_) => "not_found",
            ToolError::Store(_) => "store",
            ToolError::Embed(_) => "embed",
            ToolError::Index(e) if e.is_workspace_mismatch() => "workspace_mismatch",
            ToolError::Index(e) if e.is_store_unavailable() => "store",
            ToolError::Index(_) => "index",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            "invalid_argument" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "workspace_mismatch" => StatusCode::CONFLICT,
            "store" => StatusCode::SERVICE_UNAVAILABLE,
            "embed" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
