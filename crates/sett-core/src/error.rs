//! Error types shared across the workspace

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a graph store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached or could not persist the change.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    /// The changeset or query was refused before anything was applied.
    #[error("graph store rejected request: {0}")]
    Rejected(String),
}

/// Failures reported by an embedding function.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("malformed embedding response: {0}")]
    Response(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("namespace is bound to {bound}, refusing to index {requested} without confirmation")]
    WorkspaceMismatch { bound: PathBuf, requested: PathBuf },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
