//! Persistent fingerprint → content-hash cache

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::model::{ContentHash, Fingerprint};

/// Hash cache file inside the state directory
pub const HASH_CACHE: &str = "hashes.json";

/// Get hash cache file path
pub fn hash_cache_path(state_dir: &Path) -> PathBuf {
    state_dir.join(HASH_CACHE)
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| CoreError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CoreError::io(path, e))?;
    Ok(())
}

/// `{workspace_root, hashes}` record persisted between passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HashCache {
    pub workspace_root: PathBuf,
    pub hashes: BTreeMap<Fingerprint, ContentHash>,
}

/// How the fresh parse of the files in scope compares to the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub added: BTreeSet<Fingerprint>,
    pub changed: BTreeSet<Fingerprint>,
    pub unchanged: BTreeSet<Fingerprint>,
    pub removed: BTreeSet<Fingerprint>,
}

impl Classification {
    /// Fingerprints whose nodes must be written.
    pub fn needs_write(&self, fp: &Fingerprint) -> bool {
        self.added.contains(fp) || self.changed.contains(fp)
    }

    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

impl HashCache {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        HashCache {
            workspace_root: workspace_root.into(),
            hashes: BTreeMap::new(),
        }
    }

    /// Load the cache. A missing, unreadable or corrupt file yields an empty
    /// cache, which forces full reinsertion on the next pass.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Hash cache {} unreadable, starting empty: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_slice::<HashCache>(&bytes) {
            Ok(cache) => {
                debug!("Loaded {} cached hashes from {}", cache.hashes.len(), path.display());
                cache
            }
            Err(e) => {
                warn!("Hash cache {} corrupt, starting empty: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)?;
        debug!("Hash cache saved: {} ({} entries)", path.display(), self.hashes.len());
        Ok(())
    }

    /// Cached fingerprints whose entity lives in `file`.
    pub fn fingerprints_in_file(&self, file: &str) -> Vec<Fingerprint> {
        self.hashes
            .keys()
            .filter(|fp| fp.file_path() == Some(file))
            .cloned()
            .collect()
    }

    /// Compare a fresh parse of `scope` against the cache. Cached entries of
    /// files outside `scope` are neither compared nor removed.
    pub fn classify(
        &self,
        scope: &BTreeSet<String>,
        fresh: &BTreeMap<Fingerprint, ContentHash>,
    ) -> Classification {
        let mut out = Classification::default();
        for (fp, hash) in fresh {
            match self.hashes.get(fp) {
                None => {
                    out.added.insert(fp.clone());
                }
                Some(old) if old != hash => {
                    out.changed.insert(fp.clone());
                }
                Some(_) => {
                    out.unchanged.insert(fp.clone());
                }
            }
        }
        for fp in self.hashes.keys() {
            let in_scope = fp.file_path().is_some_and(|p| scope.contains(p));
            if in_scope && !fresh.contains_key(fp) {
                out.removed.insert(fp.clone());
            }
        }
        out
    }

    /// Fold a successful pass into the cache.
    pub fn commit(&mut self, classification: &Classification, fresh: &BTreeMap<Fingerprint, ContentHash>) {
        for fp in &classification.removed {
            self.hashes.remove(fp);
        }
        for fp in classification.added.iter().chain(&classification.changed) {
            if let Some(hash) = fresh.get(fp) {
                self.hashes.insert(fp.clone(), hash.clone());
            }
        }
    }
}
