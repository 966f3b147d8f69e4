//! In-process graph store backed by petgraph::StableDiGraph
//!
//! Changes are staged on a copy of the graph and swapped in only after the
//! optional snapshot has been written, so a failed apply leaves both the
//! in-memory state and the snapshot untouched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::write_atomic;
use crate::changeset::Changeset;
use crate::error::StoreError;
use crate::model::*;
use crate::store::*;

/// Snapshot file inside the state directory
pub const GRAPH_SNAPSHOT: &str = "graph.bin";

#[derive(Debug, Clone, Default)]
struct Graph {
    inner: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<Fingerprint, NodeIndex>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

impl Graph {
    fn node(&self, fp: &Fingerprint) -> Option<&GraphNode> {
        self.index.get(fp).and_then(|&idx| self.inner.node_weight(idx))
    }

    fn find_edge(&self, key: &EdgeKey) -> Option<EdgeIndex> {
        let source = *self.index.get(&key.source)?;
        let target = *self.index.get(&key.target)?;
        self.inner
            .edges_directed(source, Direction::Outgoing)
            .find(|e| e.target() == target && e.weight().kind == key.kind)
            .map(|e| e.id())
    }

    fn upsert_node(&mut self, node: GraphNode) {
        match self.index.get(&node.fingerprint) {
            Some(&idx) => {
                // Replace in place so incident edges survive
                if let Some(slot) = self.inner.node_weight_mut(idx) {
                    *slot = node;
                }
            }
            None => {
                let fp = node.fingerprint.clone();
                let idx = self.inner.add_node(node);
                self.index.insert(fp, idx);
            }
        }
    }

    fn remove_node(&mut self, fp: &Fingerprint) {
        if let Some(idx) = self.index.remove(fp) {
            self.inner.remove_node(idx);
        }
    }

    fn upsert_edge(&mut self, edge: GraphEdge) -> Result<(), StoreError> {
        if let Some(idx) = self.find_edge(&edge.key()) {
            if let Some(slot) = self.inner.edge_weight_mut(idx) {
                *slot = edge;
            }
            return Ok(());
        }
        let (Some(&source), Some(&target)) = (self.index.get(&edge.source), self.index.get(&edge.target))
        else {
            return Err(StoreError::Rejected(format!(
                "edge {} -[{:?}]-> {} references a missing node",
                edge.source, edge.kind, edge.target
            )));
        };
        self.inner.add_edge(source, target, edge);
        Ok(())
    }

    fn remove_edge(&mut self, key: &EdgeKey) {
        if let Some(idx) = self.find_edge(key) {
            self.inner.remove_edge(idx);
        }
    }

    fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.inner
            .node_indices()
            .filter_map(move |idx| self.inner.node_weight(idx))
    }

    fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.inner
            .edge_indices()
            .filter_map(move |idx| self.inner.edge_weight(idx))
    }

    fn apply(&mut self, changeset: &Changeset) -> Result<(), StoreError> {
        if changeset.purge_all {
            *self = Graph::default();
        }
        for key in &changeset.delete_edges {
            self.remove_edge(key);
        }
        for fp in &changeset.delete_nodes {
            self.remove_node(fp);
        }
        for node in &changeset.upsert_nodes {
            self.upsert_node(node.clone());
        }
        for edge in &changeset.upsert_edges {
            self.upsert_edge(edge.clone())?;
        }
        Ok(())
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut graph = Graph::default();
        for node in snapshot.nodes {
            graph.upsert_node(node);
        }
        for edge in snapshot.edges {
            graph.upsert_edge(edge)?;
        }
        Ok(graph)
    }

    fn neighbors(&self, fp: &Fingerprint, kind: EdgeKind) -> Vec<Neighbor> {
        let Some(&idx) = self.index.get(fp) else {
            return Vec::new();
        };
        let mut found: Vec<Neighbor> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().kind == kind)
            .filter_map(|e| {
                self.inner.node_weight(e.target()).map(|node| Neighbor {
                    node: node.clone(),
                    line: e.weight().line,
                })
            })
            .collect();
        found.sort_by(|a, b| {
            (&a.node.fingerprint, a.line).cmp(&(&b.node.fingerprint, b.line))
        });
        found
    }

    fn query(&self, query: GraphQuery) -> QueryResult {
        match query {
            GraphQuery::Node(fp) => QueryResult::Node(self.node(&fp).cloned()),
            GraphQuery::ByName { kind, name } => QueryResult::Nodes(self.sorted(|n| {
                n.kind == kind && (n.name == name || n.qualified_name == name)
            })),
            GraphQuery::OfKind(kind) => QueryResult::Nodes(self.sorted(|n| n.kind == kind)),
            GraphQuery::InFile(file) => QueryResult::Nodes(self.sorted(|n| n.file_path == file)),
            GraphQuery::Inverse { node, relation } => {
                QueryResult::Neighbors(self.neighbors(&node, relation.inverse()))
            }
            GraphQuery::Incident(fp) => {
                let Some(&idx) = self.index.get(&fp) else {
                    return QueryResult::Edges(Vec::new());
                };
                let edges = self
                    .inner
                    .edges_directed(idx, Direction::Outgoing)
                    .chain(self.inner.edges_directed(idx, Direction::Incoming))
                    .map(|e| e.weight().clone())
                    .collect();
                QueryResult::Edges(edges)
            }
            GraphQuery::OwnedEdges(file) => {
                let mut edges: Vec<GraphEdge> = self
                    .edges()
                    .filter(|e| e.kind.is_forward() && e.source.file_path() == Some(file.as_str()))
                    .cloned()
                    .collect();
                edges.sort_by(|a, b| a.key().cmp(&b.key()));
                QueryResult::Edges(edges)
            }
            GraphQuery::EmbeddingNeighbors { vector, k, kinds } => {
                let mut scored: Vec<ScoredNode> = self
                    .nodes()
                    .filter(|n| kinds.is_empty() || kinds.contains(&n.kind))
                    .filter_map(|n| {
                        let embedding = n.embedding.as_ref()?;
                        Some(ScoredNode {
                            node: n.clone(),
                            score: cosine_similarity(&vector, embedding),
                        })
                    })
                    .collect();
                scored.sort_by(|a, b| {
                    b.score
                        .total_cmp(&a.score)
                        .then_with(|| a.node.fingerprint.cmp(&b.node.fingerprint))
                });
                scored.truncate(k);
                QueryResult::Scored(scored)
            }
            GraphQuery::Stats => QueryResult::Stats(StoreStats {
                nodes: self.inner.node_count(),
                edges: self.inner.edge_count(),
            }),
        }
    }

    fn sorted(&self, pred: impl Fn(&GraphNode) -> bool) -> Vec<GraphNode> {
        let mut nodes: Vec<GraphNode> = self.nodes().filter(|n| pred(*n)).cloned().collect();
        nodes.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        nodes
    }
}

/// Reject changesets that would leave a dangling or one-directional edge.
fn validate(current: &Graph, changeset: &Changeset) -> Result<(), StoreError> {
    changeset.check_pairs().map_err(StoreError::Rejected)?;

    let deleted: HashSet<&Fingerprint> = changeset.delete_nodes.iter().collect();
    let upserted: HashSet<&Fingerprint> =
        changeset.upsert_nodes.iter().map(|n| &n.fingerprint).collect();
    let exists_after = |fp: &Fingerprint| {
        upserted.contains(fp)
            || (!changeset.purge_all && !deleted.contains(fp) && current.index.contains_key(fp))
    };
    for edge in &changeset.upsert_edges {
        if !exists_after(&edge.source) || !exists_after(&edge.target) {
            return Err(StoreError::Rejected(format!(
                "edge {} -[{:?}]-> {} references a node absent after the change",
                edge.source, edge.kind, edge.target
            )));
        }
    }
    Ok(())
}

/// Graph store living in process memory, optionally mirrored to a snapshot.
pub struct MemoryStore {
    graph: RwLock<Graph>,
    snapshot_path: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            graph: RwLock::new(Graph::default()),
            snapshot_path: None,
        }
    }

    /// Open a store persisted under `state_dir`. A missing snapshot starts
    /// empty; an unreadable one is discarded with a warning.
    pub fn open(state_dir: &Path) -> Self {
        let path = state_dir.join(GRAPH_SNAPSHOT);
        let graph = match std::fs::read(&path) {
            Ok(bytes) => match bincode::deserialize::<Snapshot>(&bytes) {
                Ok(snapshot) => Graph::from_snapshot(snapshot).unwrap_or_else(|e| {
                    warn!("Graph snapshot {} inconsistent, starting empty: {}", path.display(), e);
                    Graph::default()
                }),
                Err(e) => {
                    warn!("Graph snapshot {} corrupt, starting empty: {}", path.display(), e);
                    Graph::default()
                }
            },
            Err(_) => Graph::default(),
        };
        debug!(
            "Opened graph store at {} ({} nodes)",
            path.display(),
            graph.inner.node_count()
        );
        MemoryStore {
            graph: RwLock::new(graph),
            snapshot_path: Some(path),
        }
    }

    fn persist(&self, graph: &Graph) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let bytes = bincode::serialize(&graph.to_snapshot())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        write_atomic(path, &bytes).map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn apply(&self, changeset: &Changeset) -> Result<(), StoreError> {
        let mut graph = self.graph.write().await;
        validate(&graph, changeset)?;

        let mut staged = graph.clone();
        staged.apply(changeset)?;
        self.persist(&staged)?;
        *graph = staged;

        debug!(
            "Applied changeset #{}: +{} nodes, -{} nodes, +{} edges, -{} edges",
            changeset.sequence,
            changeset.upsert_nodes.len(),
            changeset.delete_nodes.len(),
            changeset.upsert_edges.len(),
            changeset.delete_edges.len()
        );
        Ok(())
    }

    async fn query(&self, query: GraphQuery) -> Result<QueryResult, StoreError> {
        Ok(self.graph.read().await.query(query))
    }
}
