//! Orchestrates indexing passes
//!
//! A pass moves through Scanning → Parsing → Diffing → Building → Applying
//! and back to Idle. Only one pass runs at a time; the hash cache and the
//! workspace record are written only after the store accepted the
//! changeset.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sett_core::{
    Binding, Classification, EntityKind, Embedder, Fingerprint, GraphEdge, GraphReader, GraphStore,
    HashCache, WorkspaceRecord, check_binding, hash_cache_path, workspace_record_path,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::builder::{self, BuildInput, ExternalSymbols, record_tag, wanted_names};
use crate::config::SettConfig;
use crate::error::{IndexError, ParseError};
use crate::extractor::{ParsedFile, ParserRegistry};
use crate::scanner::{self, FileFilter};

/// What a pass looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassScope {
    /// Every indexable file under the root.
    Full,
    /// Just these paths, absolute or root-relative. Missing paths are
    /// deletions.
    Paths(Vec<PathBuf>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Scanning = 1,
    Parsing = 2,
    Diffing = 3,
    Building = 4,
    Applying = 5,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Scanning,
            2 => Phase::Parsing,
            3 => Phase::Diffing,
            4 => Phase::Building,
            5 => Phase::Applying,
            _ => Phase::Idle,
        }
    }
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub sequence: u64,
    pub full: bool,
    /// The namespace was rebound to this root and purged first.
    pub rebound: bool,
    pub files_parsed: usize,
    pub files_failed: usize,
    pub files_deleted: usize,
    pub nodes_upserted: usize,
    pub nodes_deleted: usize,
    pub edges_upserted: usize,
    pub edges_deleted: usize,
    pub unresolved_calls: usize,
    pub embeddings: usize,
    pub embedding_failures: usize,
    pub duration_ms: u64,
    /// Phases the pass entered, in order.
    pub phases: Vec<Phase>,
}

struct PassState {
    cache: HashCache,
    record: Option<WorkspaceRecord>,
    sequence: u64,
}

/// The incremental indexer bound to one workspace root.
pub struct Indexer {
    root: PathBuf,
    state_dir: PathBuf,
    config: SettConfig,
    filter: FileFilter,
    registry: Arc<ParserRegistry>,
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
    state: Mutex<PassState>,
    phase: AtomicU8,
}

/// Resets the observable phase when a pass ends, however it ends.
struct PhaseGuard<'a> {
    current: &'a AtomicU8,
    entered: Vec<Phase>,
}

impl<'a> PhaseGuard<'a> {
    fn new(current: &'a AtomicU8) -> Self {
        Self {
            current,
            entered: Vec::new(),
        }
    }

    fn set(&mut self, phase: Phase) {
        debug!("Pass phase: {:?}", phase);
        self.current.store(phase as u8, Ordering::SeqCst);
        self.entered.push(phase);
    }

    fn entered(&mut self) -> Vec<Phase> {
        std::mem::take(&mut self.entered)
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.current.store(Phase::Idle as u8, Ordering::SeqCst);
    }
}

impl Indexer {
    pub fn new(
        root: impl AsRef<Path>,
        config: SettConfig,
        store: Arc<dyn GraphStore>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, IndexError> {
        Self::with_registry(root, config, store, embedder, ParserRegistry::with_defaults())
    }

    pub fn with_registry(
        root: impl AsRef<Path>,
        config: SettConfig,
        store: Arc<dyn GraphStore>,
        embedder: Option<Arc<dyn Embedder>>,
        registry: ParserRegistry,
    ) -> Result<Self, IndexError> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root).map_err(|e| sett_core::CoreError::io(root, e))?;
        let state_dir = config.resolved_state_dir(&root);
        let filter = FileFilter::new(&config)?;
        let cache = HashCache::load(&hash_cache_path(&state_dir));
        let record = WorkspaceRecord::load(&workspace_record_path(&state_dir));
        debug!(
            "Indexer for {} using state dir {} ({} cached hashes)",
            root.display(),
            state_dir.display(),
            cache.hashes.len()
        );
        Ok(Indexer {
            root,
            state_dir,
            config,
            filter,
            registry: Arc::new(registry),
            store,
            embedder,
            state: Mutex::new(PassState {
                cache,
                record,
                sequence: 0,
            }),
            phase: AtomicU8::new(Phase::Idle as u8),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config(&self) -> &SettConfig {
        &self.config
    }

    pub fn filter(&self) -> &FileFilter {
        &self.filter
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Run one pass. `confirm` allows rebinding the namespace to this root.
    pub async fn run(&self, scope: PassScope, confirm: bool) -> Result<PassReport, IndexError> {
        let mut state = self.state.lock().await;
        let started = Instant::now();
        let mut phase = PhaseGuard::new(&self.phase);

        state.sequence += 1;
        let mut report = PassReport {
            sequence: state.sequence,
            ..Default::default()
        };

        // Identity first: nothing else happens against a foreign namespace
        let binding = check_binding(state.record.as_ref(), &self.root, confirm)?;
        let mut cache = state.cache.clone();
        if binding == Binding::Rebound {
            warn!(
                "Rebinding namespace {:?} to {}; existing graph will be purged",
                self.config.namespace,
                self.root.display()
            );
            cache = HashCache::new(&self.root);
            report.rebound = true;
        } else if cache.workspace_root != self.root {
            if !cache.hashes.is_empty() {
                warn!("Hash cache belongs to {}, starting empty", cache.workspace_root.display());
            }
            cache = HashCache::new(&self.root);
        }
        let mut reset = false;
        if !report.rebound && !cache.hashes.is_empty() && self.store.stats().await?.nodes == 0 {
            warn!("Graph store is empty but the hash cache is not; reindexing everything");
            cache = HashCache::new(&self.root);
            reset = true;
        }

        report.full = report.rebound || reset || scope == PassScope::Full;

        let (present, deleted) = match &scope {
            PassScope::Paths(paths) if !report.full => {
                let (present, deleted) = self.scan_paths(paths, &cache);
                // Deletion-only batches never scan or parse
                if !present.is_empty() {
                    phase.set(Phase::Scanning);
                }
                (present, deleted)
            }
            _ => {
                phase.set(Phase::Scanning);
                self.scan_full(&cache)
            }
        };
        report.files_deleted = deleted.len();

        let mut parsed = Vec::new();
        let results = if present.is_empty() {
            Vec::new()
        } else {
            phase.set(Phase::Parsing);
            self.parse(present).await?
        };
        for (rel, result) in results {
            match result {
                Ok(file) => parsed.push(file),
                Err(e) => {
                    // Previous entities of the file stay in the graph
                    warn!("Skipping {}: {}", rel, e);
                    report.files_failed += 1;
                }
            }
        }
        report.files_parsed = parsed.len();
        for file in &parsed {
            for why in &file.dropped {
                debug!("Dropped fact: {}", why);
            }
        }

        phase.set(Phase::Diffing);
        let scope_files: BTreeSet<String> = parsed
            .iter()
            .map(|f| f.path.clone())
            .chain(deleted.iter().cloned())
            .collect();
        if scope_files.is_empty() && !report.rebound {
            debug!("Pass #{} has nothing in scope", report.sequence);
            if state.record.is_none() {
                let record = WorkspaceRecord::new(&self.root);
                record.save(&workspace_record_path(&self.state_dir))?;
                state.record = Some(record);
            }
            report.phases = phase.entered();
            report.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(report);
        }
        let fresh: BTreeMap<Fingerprint, sett_core::ContentHash> =
            parsed.iter().flat_map(|f| f.hashes()).collect();
        let classification = cache.classify(&scope_files, &fresh);
        debug!(
            "Classified {} added, {} changed, {} unchanged, {} removed",
            classification.added.len(),
            classification.changed.len(),
            classification.unchanged.len(),
            classification.removed.len()
        );

        phase.set(Phase::Building);
        let (external, existing_owned, removed_incident) = if report.rebound {
            // The store is purged first, so nothing in it is relevant
            (ExternalSymbols::new(), Vec::new(), Vec::new())
        } else {
            self.prefetch(&parsed, &scope_files, &classification).await?
        };
        let mut built = builder::build(BuildInput {
            sequence: report.sequence,
            purge_all: report.rebound,
            parsed: &parsed,
            classification: &classification,
            external: &external,
            existing_owned: &existing_owned,
            removed_incident: &removed_incident,
        });
        report.unresolved_calls = built.unresolved_calls;

        if let Some(embedder) = &self.embedder {
            for node in &mut built.changeset.upsert_nodes {
                let Some(text) = built.embed_texts.get(&node.fingerprint) else {
                    continue;
                };
                match embedder.embed(text).await {
                    Ok(vector) if vector.len() == embedder.dimensions() => {
                        node.embedding = Some(vector);
                        report.embeddings += 1;
                    }
                    Ok(vector) => {
                        warn!(
                            "Embedding for {} has {} dimensions, expected {}",
                            node.fingerprint,
                            vector.len(),
                            embedder.dimensions()
                        );
                        report.embedding_failures += 1;
                    }
                    Err(e) => {
                        warn!("Embedding failed for {}: {}", node.fingerprint, e);
                        report.embedding_failures += 1;
                    }
                }
            }
        }

        let changeset = built.changeset;
        report.nodes_upserted = changeset.upsert_nodes.len();
        report.nodes_deleted = changeset.delete_nodes.len();
        report.edges_upserted = changeset.upsert_edges.len();
        report.edges_deleted = changeset.delete_edges.len();

        phase.set(Phase::Applying);
        if changeset.is_empty() {
            debug!("Pass #{} changed nothing", report.sequence);
        } else {
            // Unavailable stores abort here with the cache untouched
            self.store.apply(&changeset).await?;
        }

        cache.commit(&classification, &fresh);
        cache.save(&hash_cache_path(&self.state_dir))?;
        let record = WorkspaceRecord::new(&self.root);
        record.save(&workspace_record_path(&self.state_dir))?;
        state.cache = cache;
        state.record = Some(record);

        report.phases = phase.entered();
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Pass #{} done in {}ms: {} parsed, {} failed, {} deleted, +{}/-{} nodes, +{}/-{} edges, {} unresolved calls",
            report.sequence,
            report.duration_ms,
            report.files_parsed,
            report.files_failed,
            report.files_deleted,
            report.nodes_upserted,
            report.nodes_deleted,
            report.edges_upserted,
            report.edges_deleted,
            report.unresolved_calls
        );
        Ok(report)
    }

    /// Present files on disk, plus cached files that vanished.
    fn scan_full(&self, cache: &HashCache) -> (Vec<String>, Vec<String>) {
        let present = scanner::scan(&self.root, &self.filter);
        let on_disk: BTreeSet<&str> = present.iter().map(String::as_str).collect();
        let deleted = cached_files(cache)
            .into_iter()
            .filter(|f| !on_disk.contains(f.as_str()))
            .collect();
        (present, deleted)
    }

    fn scan_paths(&self, paths: &[PathBuf], cache: &HashCache) -> (Vec<String>, Vec<String>) {
        let mut present = BTreeSet::new();
        let mut deleted = BTreeSet::new();
        let cached = cached_files(cache);
        for path in paths {
            let Some(rel) = scanner::relativize(&self.root, path) else {
                debug!("Ignoring {} outside the workspace", path.display());
                continue;
            };
            let abs = self.root.join(&rel);
            if self.filter.accepts(&rel) {
                if abs.is_file() {
                    present.insert(rel);
                } else {
                    deleted.insert(rel);
                }
            } else if !abs.exists() {
                // A removed directory takes its files with it
                let prefix = format!("{}/", rel);
                deleted.extend(cached.iter().filter(|f| f.starts_with(&prefix)).cloned());
            }
        }
        (present.into_iter().collect(), deleted.into_iter().collect())
    }

    async fn parse(
        &self,
        files: Vec<String>,
    ) -> Result<Vec<(String, Result<ParsedFile, ParseError>)>, IndexError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let registry = self.registry.clone();
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            files
                .par_iter()
                .map(|rel| (rel.clone(), registry.parse_file(&root, rel)))
                .collect()
        })
        .await
        .map_err(|e| IndexError::Worker(e.to_string()))
    }

    /// Read what the builder needs from the store: resolution candidates
    /// outside the scope, the scope's current forward edges, and edges of
    /// nodes about to be removed.
    async fn prefetch(
        &self,
        parsed: &[ParsedFile],
        scope: &BTreeSet<String>,
        classification: &Classification,
    ) -> Result<(ExternalSymbols, Vec<GraphEdge>, Vec<GraphEdge>), IndexError> {
        let outside = |n: &sett_core::GraphNode| !scope.contains(&n.file_path);

        let mut external = ExternalSymbols::new();
        for (kind, name) in wanted_names(parsed) {
            let found = self.store.get_by_name(kind, &name).await?;
            external.extend(found.into_iter().filter(|n| outside(n)));
        }
        let tags: BTreeSet<String> = external
            .iter()
            .filter(|n| n.kind == EntityKind::Typedef)
            .filter_map(|n| n.metadata.get("underlying_type"))
            .filter_map(|u| record_tag(u).map(str::to_string))
            .chain(
                parsed
                    .iter()
                    .flat_map(|f| f.entities_of(EntityKind::Typedef))
                    .filter_map(|e| e.metadata.get("underlying_type"))
                    .filter_map(|u| record_tag(u).map(str::to_string)),
            )
            .collect();
        for tag in tags {
            let found = self.store.get_by_name(EntityKind::Class, &tag).await?;
            external.extend(found.into_iter().filter(|n| outside(n)));
        }

        let mut owned = Vec::new();
        for file in scope {
            owned.extend(self.store.owned_edges(file).await?);
        }
        let mut incident = Vec::new();
        for fp in &classification.removed {
            incident.extend(self.store.edges_of(fp).await?);
        }
        debug!(
            "Prefetched {} external symbols, {} owned edges, {} incident edges",
            external.len(),
            owned.len(),
            incident.len()
        );
        Ok((external, owned, incident))
    }
}

fn cached_files(cache: &HashCache) -> BTreeSet<String> {
    cache
        .hashes
        .keys()
        .filter_map(|fp| fp.file_path().map(str::to_string))
        .collect()
}
