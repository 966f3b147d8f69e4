//! Indexer error types

use std::path::PathBuf;

use sett_core::{CoreError, StoreError};
use thiserror::Error;

/// A single file could not be parsed. Never fatal to a pass.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    Utf8(PathBuf),
    #[error("no grammar registered for {0}")]
    Unsupported(PathBuf),
    #[error("grammar for {language} failed to load: {message}")]
    Grammar { language: String, message: String },
    #[error("parser produced no tree for {0}")]
    NoTree(PathBuf),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("parse workers failed: {0}")]
    Worker(String),
}

impl IndexError {
    pub fn is_workspace_mismatch(&self) -> bool {
        matches!(self, IndexError::Core(CoreError::WorkspaceMismatch { .. }))
    }

    /// Passes aborted for this reason are retried on the next trigger.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            IndexError::Store(StoreError::Unavailable(_))
                | IndexError::Core(CoreError::Store(StoreError::Unavailable(_)))
        )
    }
}
