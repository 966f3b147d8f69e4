//! Integration tests for Sett
//!
//! These tests verify that multiple systems work together correctly.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sett_core::{GraphStore, MemoryStore};
use sett_indexer::{IndexError, Indexer, PassReport, PassScope, SettConfig};
use sett_server::Tools;
use sett_watcher::{ChangeKind, PassRunner, PathEvent, WatcherService};
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};

struct Project {
    ws: TempDir,
    state: TempDir,
    store: Arc<MemoryStore>,
}

impl Project {
    fn new(files: &[(&str, &str)]) -> Self {
        let project = Project {
            ws: TempDir::new().unwrap(),
            state: TempDir::new().unwrap(),
            store: Arc::new(MemoryStore::new()),
        };
        for (rel, content) in files {
            project.write(rel, content);
        }
        project
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.ws.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn indexer(&self) -> Indexer {
        let config = SettConfig {
            state_dir: Some(self.state.path().to_path_buf()),
            ..Default::default()
        };
        Indexer::new(self.ws.path(), config, self.store.clone(), None).unwrap()
    }

    fn tools(&self) -> Tools {
        let store: Arc<dyn GraphStore> = self.store.clone();
        Tools::new(store, None)
    }
}

const HEADER_PROJECT: &[(&str, &str)] = &[
    ("h.h", "int f(void);\n"),
    ("a.c", "#include \"h.h\"\nint f(void) { return 1; }\n"),
    ("b.c", "#include \"h.h\"\nint g(void) { return f() + 1; }\n"),
];

#[tokio::test]
async fn header_dependents_and_affected_files() {
    let project = Project::new(HEADER_PROJECT);
    project.indexer().run(PassScope::Full, false).await.unwrap();
    let tools = project.tools();

    let deps = tools.get_include_dependencies("h.h").await.unwrap();
    let files: Vec<&str> = deps.dependencies.iter().map(|d| d.file.as_str()).collect();
    assert_eq!(files, vec!["a.c", "b.c"]);

    let affected = tools
        .check_affected_files(&["a.c".to_string()])
        .await
        .unwrap();
    assert!(affected.affected_files.contains(&"b.c".to_string()));
    assert!(!affected.affected_files.contains(&"a.c".to_string()));
}

#[tokio::test]
async fn callers_follow_incremental_edits() {
    let project = Project::new(HEADER_PROJECT);
    let indexer = project.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();

    project.write("c.c", "#include \"h.h\"\nint k(void) { return f(); }\n");
    project.write("b.c", "#include \"h.h\"\nint g(void) { return 2; }\n");
    indexer
        .run(PassScope::Paths(vec!["b.c".into(), "c.c".into()]), false)
        .await
        .unwrap();

    let callers = project.tools().get_function_callers("f").await.unwrap();
    let names: Vec<&str> = callers.callers.iter().map(|c| c.by.name.as_str()).collect();
    assert_eq!(names, vec!["k"]);
}

/// Wraps the indexer to observe each pass.
struct Observed {
    indexer: Indexer,
    batches: Mutex<Vec<Vec<PathBuf>>>,
    done: Notify,
}

#[async_trait]
impl PassRunner for Observed {
    async fn run_paths(&self, paths: Vec<PathBuf>) -> Result<PassReport, IndexError> {
        self.batches.lock().unwrap().push(paths.clone());
        let result = self.indexer.run_paths(paths).await;
        self.done.notify_one();
        result
    }
}

#[tokio::test]
async fn burst_of_edits_is_indexed_in_one_pass() {
    let project = Project::new(HEADER_PROJECT);
    let indexer = project.indexer();
    indexer.run(PassScope::Full, false).await.unwrap();
    let root = indexer.root().to_path_buf();

    let observed = Arc::new(Observed {
        indexer,
        batches: Mutex::new(Vec::new()),
        done: Notify::new(),
    });
    let (tx, rx) = mpsc::unbounded_channel();
    let service = tokio::spawn(WatcherService::new(observed.clone(), Duration::from_millis(300)).run(rx));

    project.write("a.c", "#include \"h.h\"\nint f(void) { return 2; }\n");
    project.write("d.c", "#include \"h.h\"\nint m(void) { return f(); }\n");
    fs::remove_file(project.ws.path().join("b.c")).unwrap();
    for (rel, kind) in [
        ("a.c", ChangeKind::Modified),
        ("d.c", ChangeKind::Created),
        ("b.c", ChangeKind::Deleted),
    ] {
        tx.send(PathEvent::new(root.join(rel), kind)).unwrap();
    }

    tokio::time::timeout(Duration::from_secs(20), observed.done.notified())
        .await
        .expect("no pass ran");
    tokio::time::sleep(Duration::from_millis(600)).await;

    let batches = observed.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);

    let callers = project.tools().get_function_callers("f").await.unwrap();
    let names: Vec<&str> = callers.callers.iter().map(|c| c.by.name.as_str()).collect();
    assert_eq!(names, vec!["m"]);

    drop(tx);
    service.await.unwrap();
}

// ── CLI ─────────────────────────────────────────────────────

fn sett(root: &Path, state: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_sett"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env("SETT_STATE_DIR", state)
        .env("SETT_EMBEDDING_PROVIDER", "local")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run sett")
}

#[test]
fn cli_indexes_and_answers_queries() {
    let project = Project::new(HEADER_PROJECT);
    let (root, state) = (project.ws.path(), project.state.path());

    let out = sett(root, state, &["index"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["files_parsed"], 3);

    let out = sett(root, state, &["query", "get_function_callers", r#"{"name":"f"}"#]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let response: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(response["ok"], true);
    assert_eq!(response["result"]["callers"][0]["by"]["name"], "g");

    let out = sett(root, state, &["query", "get_function_callers", r#"{"name":"nope"}"#]);
    assert!(!out.status.success());
    let response: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(response["kind"], "not_found");
}

#[test]
fn cli_refuses_a_second_workspace_without_yes() {
    let first = Project::new(HEADER_PROJECT);
    let second = TempDir::new().unwrap();
    fs::write(second.path().join("x.py"), "def x():\n    return 1\n").unwrap();
    let state = first.state.path();

    assert!(sett(first.ws.path(), state, &["index"]).status.success());

    let refused = sett(second.path(), state, &["index"]);
    assert!(!refused.status.success());
    assert!(String::from_utf8_lossy(&refused.stderr).contains("--yes"));

    let rebound = sett(second.path(), state, &["index", "--yes"]);
    assert!(rebound.status.success(), "{}", String::from_utf8_lossy(&rebound.stderr));
    let report: serde_json::Value = serde_json::from_slice(&rebound.stdout).unwrap();
    assert_eq!(report["rebound"], true);
}

#[test]
fn cli_stats_reports_graph_counts() {
    let project = Project::new(HEADER_PROJECT);
    let (root, state) = (project.ws.path(), project.state.path());
    assert!(sett(root, state, &["index"]).status.success());

    let out = sett(root, state, &["stats"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stats: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(stats["by_kind"]["file"], 3);
    assert_eq!(stats["by_kind"]["function"], 2);
    assert!(stats["nodes"].as_u64().unwrap() >= 5);
    assert!(stats["edges"].as_u64().unwrap() > 0);
}

#[test]
fn cli_clear_removes_state() {
    let project = Project::new(HEADER_PROJECT);
    let (root, state) = (project.ws.path(), project.state.path());
    assert!(sett(root, state, &["index"]).status.success());
    assert!(state.join("hashes.json").exists());

    assert!(sett(root, state, &["clear"]).status.success());
    assert!(!state.join("hashes.json").exists());
    assert!(!state.join("workspace.json").exists());
    assert!(!state.join("graph.bin").exists());
}
