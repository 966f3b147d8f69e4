//! CLI command implementations

use anyhow::{Context as _, bail};
use sett_core::{Embedder, EntityKind, GraphReader, GraphStore, MemoryStore};
use sett_core::cache::HASH_CACHE;
use sett_core::memory::GRAPH_SNAPSHOT;
use sett_core::workspace::WORKSPACE_RECORD;
use sett_indexer::{IndexError, Indexer, PassReport, PassScope, SettConfig};
use sett_server::{ServerState, SettServer, TOOLS, Tools, protocol};
use sett_watcher::{FileWatcher, WatcherService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything a command needs for one workspace.
struct Workspace {
    root: PathBuf,
    config: SettConfig,
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl Workspace {
    fn open(root: &Path) -> anyhow::Result<Self> {
        let config = SettConfig::load(root)?;
        let state_dir = config.resolved_state_dir(root);
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("creating state dir {}", state_dir.display()))?;
        let store = Arc::new(MemoryStore::open(&state_dir));
        let embedder = sett_embed::create_embedder(&config.embedding);
        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            embedder,
        })
    }

    fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    fn indexer(&self) -> anyhow::Result<Arc<Indexer>> {
        let indexer = Indexer::new(
            &self.root,
            self.config.clone(),
            self.store(),
            self.embedder.clone(),
        )?;
        Ok(Arc::new(indexer))
    }
}

fn explain(err: IndexError) -> anyhow::Error {
    if err.is_workspace_mismatch() {
        anyhow::anyhow!("{}\nRe-run with --yes to rebind the namespace to this workspace", err)
    } else {
        err.into()
    }
}

fn print_report(report: &PassReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub async fn index(root: PathBuf, full: bool, yes: bool, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    tracing::info!("Indexing workspace: {}", root.display());
    let ws = Workspace::open(&root)?;
    let indexer = ws.indexer()?;

    let scope = if full || paths.is_empty() {
        PassScope::Full
    } else {
        PassScope::Paths(paths)
    };
    let report = indexer.run(scope, yes).await.map_err(explain)?;
    print_report(&report)
}

/// A running watcher and the service consuming its events.
struct Watching {
    watcher: FileWatcher,
    service: JoinHandle<()>,
}

impl Watching {
    fn start(indexer: Arc<Indexer>, window: Duration) -> anyhow::Result<Self> {
        let (watcher, events) = FileWatcher::start(indexer.root(), indexer.filter().clone())?;
        let service = tokio::spawn(WatcherService::new(indexer, window).run(events));
        Ok(Self { watcher, service })
    }

    /// Stop the watcher first so the service can finish a pass that is
    /// already running.
    async fn shutdown(self) -> anyhow::Result<()> {
        self.watcher.stop()?;
        self.service.await?;
        Ok(())
    }
}

pub async fn watch(root: PathBuf, yes: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(&root)?;
    let indexer = ws.indexer()?;
    let report = indexer.run(PassScope::Full, yes).await.map_err(explain)?;
    tracing::info!(
        "Initial pass indexed {} files; watching {}",
        report.files_parsed,
        indexer.root().display()
    );
    let watching = Watching::start(indexer, Duration::from_millis(ws.config.debounce_ms))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted; stopping watcher");
    watching.shutdown().await
}

pub async fn serve(
    root: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    watch: bool,
) -> anyhow::Result<()> {
    let ws = Workspace::open(&root)?;
    let mut server_config = ws.config.server.clone();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }
    tracing::info!("Starting Sett server on {}:{}", server_config.host, server_config.port);

    let indexer = ws.indexer()?;
    let report = indexer.run(PassScope::Full, false).await.map_err(explain)?;
    tracing::info!("Indexed {} files", report.files_parsed);

    let state = ServerState::new(ws.store(), ws.embedder.clone()).with_indexer(indexer.clone());
    let server = SettServer::new(state, server_config);

    let watching = if watch {
        Some(Watching::start(indexer, Duration::from_millis(ws.config.debounce_ms))?)
    } else {
        None
    };

    tokio::select! {
        served = server.start() => served?,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            tracing::info!("Interrupted; shutting down");
        }
    }
    if let Some(watching) = watching {
        watching.shutdown().await?;
    }
    Ok(())
}

pub async fn query(root: PathBuf, tool: String, arguments: String) -> anyhow::Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(&arguments).context("tool arguments must be a JSON object")?;
    let ws = Workspace::open(&root)?;
    let tools = Tools::new(ws.store(), ws.embedder.clone());

    let response = protocol::dispatch(
        &tools,
        protocol::ToolRequest {
            tool: tool.clone(),
            arguments,
        },
    )
    .await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.ok {
        bail!("{} failed", tool);
    }
    Ok(())
}

/// Node and edge counts of the namespace's graph, with nodes by kind.
pub async fn stats(root: PathBuf) -> anyhow::Result<()> {
    let ws = Workspace::open(&root)?;
    let totals = ws.store.stats().await?;
    let mut by_kind = serde_json::Map::new();
    for kind in EntityKind::ALL {
        let count = ws.store.nodes_of_kind(kind).await?.len();
        by_kind.insert(kind.as_str().to_string(), count.into());
    }
    let out = serde_json::json!({
        "nodes": totals.nodes,
        "edges": totals.edges,
        "by_kind": by_kind,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub fn tools() -> anyhow::Result<()> {
    for tool in TOOLS {
        println!("{:<26} {}", tool.name, tool.description);
        println!("{:<26} arguments: {}", "", tool.arguments.join(", "));
    }
    Ok(())
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    let config = SettConfig::load(&root)?;
    let state_dir = config.resolved_state_dir(&root);
    tracing::info!("Clearing state for namespace {} in {}", config.namespace, state_dir.display());

    for name in [HASH_CACHE, WORKSPACE_RECORD, GRAPH_SNAPSHOT] {
        let path = state_dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
        }
    }

    tracing::info!("State cleared");
    Ok(())
}
