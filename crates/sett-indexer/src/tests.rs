//! End-to-end pass tests against the in-memory store

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sett_core::*;
use tempfile::TempDir;

use crate::{Indexer, PassScope, Phase, SettConfig};

struct Fixture {
    ws: TempDir,
    state: TempDir,
    store: Arc<MemoryStore>,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            ws: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn config(&self) -> SettConfig {
        SettConfig {
            state_dir: Some(self.state.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.ws.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(self.ws.path(), self.config(), self.store.clone(), None).unwrap()
    }
}

fn paths(rels: &[&str]) -> PassScope {
    PassScope::Paths(rels.iter().map(PathBuf::from).collect())
}

fn func(file: &str, name: &str) -> Fingerprint {
    Fingerprint::new(EntityKind::Function, file, name)
}

async fn callers(store: &MemoryStore, fp: &Fingerprint) -> Vec<String> {
    store
        .get_inverse(fp, EdgeKind::Calls)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.node.qualified_name)
        .collect()
}

const LIB_C: &str = "int f(void) { return 1; }\nint g(void) { return f(); }\n";
const APP_C: &str = "int f(void);\nint run(void) { return f() + missing(); }\n";

#[tokio::test]
async fn second_pass_over_unchanged_tree_is_empty() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("app.c", APP_C);
    let indexer = fx.indexer();

    let first = indexer.run(PassScope::Full, false).await.unwrap();
    assert_eq!(first.files_parsed, 2);
    assert!(first.nodes_upserted > 0);
    let stats = fx.store.stats().await.unwrap();

    let second = indexer.run(PassScope::Full, false).await.unwrap();
    assert_eq!(second.nodes_upserted, 0);
    assert_eq!(second.nodes_deleted, 0);
    assert_eq!(second.edges_upserted, 0);
    assert_eq!(second.edges_deleted, 0);
    assert_eq!(fx.store.stats().await.unwrap(), stats);
    assert!(second.sequence > first.sequence);
    assert_eq!(indexer.phase(), Phase::Idle);
}

#[tokio::test]
async fn state_survives_a_new_indexer_instance() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.indexer().run(PassScope::Full, false).await.unwrap();

    // Same store, cache reloaded from disk
    let report = fx.indexer().run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.nodes_upserted, 0);
    assert!(hash_cache_path(fx.state.path()).exists());
    assert!(workspace_record_path(fx.state.path()).exists());
}

#[tokio::test]
async fn relationships_are_queryable_from_both_ends() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("app.c", APP_C);
    fx.indexer().run(PassScope::Full, false).await.unwrap();

    let f = func("lib.c", "f");
    let mut found = callers(&fx.store, &f).await;
    found.sort();
    assert_eq!(found, vec!["g", "run"]);

    let run = func("app.c", "run");
    let callees = fx.store.get_inverse(&run, EdgeKind::CalledBy).await.unwrap();
    assert_eq!(callees.len(), 1);
    assert_eq!(callees[0].node.fingerprint, f);
    assert_eq!(callees[0].line, Some(2));

    // Every stored edge has its counterpart
    for file in ["lib.c", "app.c"] {
        for node in fx.store.nodes_in_file(file).await.unwrap() {
            for edge in fx.store.edges_of(&node.fingerprint).await.unwrap() {
                let back = fx.store.edges_of(&edge.target).await.unwrap();
                assert!(
                    back.iter().any(|e| e.key() == edge.key().inverse()),
                    "missing inverse of {:?}",
                    edge.key()
                );
            }
        }
    }
}

#[tokio::test]
async fn editing_one_body_touches_only_that_node() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("app.c", APP_C);
    let indexer = fx.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();
    let before = HashCache::load(&hash_cache_path(fx.state.path())).hashes;

    fx.write("lib.c", "int f(void) { return 2; }\nint g(void) { return f(); }\n");
    let report = indexer.run(paths(&["lib.c"]), false).await.unwrap();
    assert!(!report.full);
    assert_eq!(report.files_parsed, 1);
    assert_eq!(report.nodes_upserted, 1);
    assert_eq!(report.nodes_deleted, 0);
    assert_eq!(report.edges_upserted, 0);
    assert_eq!(report.edges_deleted, 0);

    let after = HashCache::load(&hash_cache_path(fx.state.path())).hashes;
    let edited = func("lib.c", "f");
    assert_eq!(
        before.keys().collect::<Vec<_>>(),
        after.keys().collect::<Vec<_>>()
    );
    assert_ne!(before[&edited], after[&edited]);
    for (fp, hash) in &before {
        if *fp != edited {
            assert_eq!(&after[fp], hash, "hash of {} changed", fp);
        }
    }

    // The cross-file caller survived
    let mut found = callers(&fx.store, &func("lib.c", "f")).await;
    found.sort();
    assert_eq!(found, vec!["g", "run"]);
}

#[tokio::test]
async fn deleting_a_file_removes_its_nodes_and_edges() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("app.c", APP_C);
    let indexer = fx.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();

    fs::remove_file(fx.ws.path().join("app.c")).unwrap();
    let report = indexer.run(paths(&["app.c"]), false).await.unwrap();
    assert_eq!(report.files_parsed, 0);
    assert_eq!(report.files_deleted, 1);
    assert_eq!(report.nodes_deleted, 2);
    assert_eq!(
        report.phases,
        vec![Phase::Diffing, Phase::Building, Phase::Applying]
    );

    assert!(fx.store.nodes_in_file("app.c").await.unwrap().is_empty());
    assert_eq!(callers(&fx.store, &func("lib.c", "f")).await, vec!["g"]);
}

#[tokio::test]
async fn full_pass_notices_vanished_files() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("old/app.c", APP_C);
    let indexer = fx.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();

    fs::remove_dir_all(fx.ws.path().join("old")).unwrap();
    let report = indexer.run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.files_deleted, 1);
    assert!(fx.store.nodes_in_file("old/app.c").await.unwrap().is_empty());
}

#[tokio::test]
async fn removed_directory_event_deletes_its_files() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("old/app.c", APP_C);
    let indexer = fx.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();

    fs::remove_dir_all(fx.ws.path().join("old")).unwrap();
    let report = indexer.run(paths(&["old"]), false).await.unwrap();
    assert_eq!(report.files_deleted, 1);
    assert!(fx.store.nodes_in_file("old/app.c").await.unwrap().is_empty());
}

#[tokio::test]
async fn unresolved_calls_are_counted() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("app.c", APP_C);
    let report = fx.indexer().run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.unresolved_calls, 1);
    let run = func("app.c", "run");
    let edges = fx.store.edges_of(&run).await.unwrap();
    assert!(edges.iter().all(|e| e.kind != EdgeKind::Calls || e.target == func("lib.c", "f")));
}

#[tokio::test]
async fn unparseable_file_keeps_previous_entities() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    let indexer = fx.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();

    fs::write(fx.ws.path().join("lib.c"), [0xff, 0xfe, 0x00, 0x41]).unwrap();
    let report = indexer.run(paths(&["lib.c"]), false).await.unwrap();
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.nodes_deleted, 0);
    assert_eq!(fx.store.nodes_in_file("lib.c").await.unwrap().len(), 3);
}

#[tokio::test]
async fn foreign_root_is_refused_without_confirmation() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.indexer().run(PassScope::Full, false).await.unwrap();

    let other = TempDir::new().unwrap();
    fs::write(other.path().join("main.py"), "def main():\n    return 0\n").unwrap();
    let indexer = Indexer::new(other.path(), fx.config(), fx.store.clone(), None).unwrap();

    let err = indexer.run(PassScope::Full, false).await.unwrap_err();
    assert!(err.is_workspace_mismatch());
    assert!(!fx.store.nodes_in_file("lib.c").await.unwrap().is_empty());

    let report = indexer.run(PassScope::Full, true).await.unwrap();
    assert!(report.rebound);
    assert!(fx.store.nodes_in_file("lib.c").await.unwrap().is_empty());
    assert_eq!(fx.store.nodes_in_file("main.py").await.unwrap().len(), 2);

    let record = WorkspaceRecord::load(&workspace_record_path(fx.state.path())).unwrap();
    assert_eq!(record.workspace_root, std::fs::canonicalize(other.path()).unwrap());
}

/// Store wrapper whose writes can be switched off.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

#[async_trait]
impl GraphStore for FlakyStore {
    async fn apply(&self, changeset: &Changeset) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.apply(changeset).await
    }

    async fn query(&self, query: GraphQuery) -> Result<QueryResult, StoreError> {
        self.inner.query(query).await
    }
}

#[tokio::test]
async fn unavailable_store_aborts_without_touching_the_cache() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        down: AtomicBool::new(true),
    });
    let indexer = Indexer::new(fx.ws.path(), fx.config(), store.clone(), None).unwrap();

    let err = indexer.run(PassScope::Full, false).await.unwrap_err();
    assert!(err.is_store_unavailable());
    assert!(!hash_cache_path(fx.state.path()).exists());
    assert!(!workspace_record_path(fx.state.path()).exists());
    assert_eq!(indexer.phase(), Phase::Idle);

    // The retry inserts everything
    store.down.store(false, Ordering::SeqCst);
    let report = indexer.run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.nodes_upserted, 3);
    assert!(hash_cache_path(fx.state.path()).exists());
}

#[tokio::test]
async fn emptied_store_forces_reinsertion() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.indexer().run(PassScope::Full, false).await.unwrap();

    // Fresh store, stale cache on disk
    let store = Arc::new(MemoryStore::new());
    let indexer = Indexer::new(fx.ws.path(), fx.config(), store.clone(), None).unwrap();
    let report = indexer.run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.nodes_upserted, 3);
    assert_eq!(store.nodes_in_file("lib.c").await.unwrap().len(), 3);
}

#[tokio::test]
async fn emptied_store_widens_a_path_pass_to_everything() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("app.c", APP_C);
    fx.indexer().run(PassScope::Full, false).await.unwrap();

    let store = Arc::new(MemoryStore::new());
    let indexer = Indexer::new(fx.ws.path(), fx.config(), store.clone(), None).unwrap();
    let report = indexer.run(paths(&["app.c"]), false).await.unwrap();
    assert!(report.full);
    assert_eq!(report.files_parsed, 2);
    assert!(!store.nodes_in_file("lib.c").await.unwrap().is_empty());
    assert_eq!(callers(&store, &func("lib.c", "f")).await.len(), 2);
}

#[tokio::test]
async fn full_pass_enters_every_phase() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    let report = fx.indexer().run(PassScope::Full, false).await.unwrap();
    assert_eq!(
        report.phases,
        vec![
            Phase::Scanning,
            Phase::Parsing,
            Phase::Diffing,
            Phase::Building,
            Phase::Applying,
        ]
    );
}

#[tokio::test]
async fn empty_workspace_still_binds_the_namespace() {
    let fx = Fixture::new();
    let report = fx.indexer().run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.files_parsed, 0);
    assert!(workspace_record_path(fx.state.path()).exists());

    let other = TempDir::new().unwrap();
    let foreign = Indexer::new(other.path(), fx.config(), fx.store.clone(), None).unwrap();
    let refused = foreign.run(PassScope::Full, false).await.unwrap_err();
    assert!(refused.is_workspace_mismatch());
}

struct StubEmbedder {
    fail_on: &'static str,
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimensions(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.contains(self.fail_on) {
            return Err(EmbedError::Request("rate limited".into()));
        }
        Ok(vec![1.0, 0.0, text.len() as f32])
    }
}

#[tokio::test]
async fn embedding_failures_leave_nodes_without_vectors() {
    let fx = Fixture::new();
    fx.write("lib.c", "int keep(void) { return 1; }\nint flaky(void) { return 2; }\n");
    let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder { fail_on: "flaky" });
    let indexer = Indexer::new(fx.ws.path(), fx.config(), fx.store.clone(), Some(embedder)).unwrap();

    let report = indexer.run(PassScope::Full, false).await.unwrap();
    assert_eq!(report.embeddings, 1);
    assert_eq!(report.embedding_failures, 1);

    let keep = fx.store.node(&func("lib.c", "keep")).await.unwrap().unwrap();
    assert_eq!(keep.embedding.map(|v| v.len()), Some(3));
    let flaky = fx.store.node(&func("lib.c", "flaky")).await.unwrap().unwrap();
    assert!(flaky.embedding.is_none());
}

#[tokio::test]
async fn paths_outside_the_filter_are_ignored() {
    let fx = Fixture::new();
    fx.write("lib.c", LIB_C);
    fx.write("notes.md", "# notes");
    let indexer = fx.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();

    let report = indexer
        .run(PassScope::Paths(vec![Path::new("notes.md").to_path_buf()]), false)
        .await
        .unwrap();
    assert_eq!(report.files_parsed, 0);
    assert_eq!(report.files_deleted, 0);
}
