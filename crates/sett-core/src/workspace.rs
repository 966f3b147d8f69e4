//! Workspace identity: one root per graph namespace

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::write_atomic;
use crate::error::{CoreError, Result};

/// Workspace record file inside the state directory
pub const WORKSPACE_RECORD: &str = "workspace.json";

pub fn workspace_record_path(state_dir: &Path) -> PathBuf {
    state_dir.join(WORKSPACE_RECORD)
}

/// `{workspace_root, indexed_at}` written after every successful pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub workspace_root: PathBuf,
    pub indexed_at: DateTime<Utc>,
}

/// Outcome of binding a root to the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Nothing was bound yet.
    Fresh,
    /// Same root as last time.
    Same,
    /// A different root, confirmed; prior data must be purged.
    Rebound,
}

impl WorkspaceRecord {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        WorkspaceRecord {
            workspace_root: workspace_root.into(),
            indexed_at: Utc::now(),
        }
    }

    /// Load the record. Unreadable records are treated as absent.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Workspace record {} corrupt, ignoring: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }
}

/// Check `requested` against the recorded binding.
pub fn check_binding(
    existing: Option<&WorkspaceRecord>,
    requested: &Path,
    confirm: bool,
) -> Result<Binding> {
    match existing {
        None => Ok(Binding::Fresh),
        Some(record) if record.workspace_root == requested => Ok(Binding::Same),
        Some(_) if confirm => Ok(Binding::Rebound),
        Some(record) => Err(CoreError::WorkspaceMismatch {
            bound: record.workspace_root.clone(),
            requested: requested.to_path_buf(),
        }),
    }
}
