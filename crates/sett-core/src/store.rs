//! Graph store seam: atomic changeset application plus typed reads

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::changeset::Changeset;
use crate::error::StoreError;
use crate::model::*;

/// Typed read requests understood by every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphQuery {
    Node(Fingerprint),
    /// Nodes of `kind` whose name or qualified name equals `name`.
    ByName { kind: EntityKind, name: String },
    OfKind(EntityKind),
    InFile(String),
    /// Nodes reached from `node` over the stored inverse of `relation`.
    Inverse { node: Fingerprint, relation: EdgeKind },
    /// Every edge with `node` as source or target.
    Incident(Fingerprint),
    /// Forward edges whose source entity lives in the given file.
    OwnedEdges(String),
    /// Nearest embeddings by cosine similarity.
    EmbeddingNeighbors {
        vector: Vec<f32>,
        k: usize,
        kinds: Vec<EntityKind>,
    },
    Stats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryResult {
    Node(Option<GraphNode>),
    Nodes(Vec<GraphNode>),
    Neighbors(Vec<Neighbor>),
    Edges(Vec<GraphEdge>),
    Scored(Vec<ScoredNode>),
    Stats(StoreStats),
}

/// A node reached over an edge, with the line recorded on that edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub node: GraphNode,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    pub node: GraphNode,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub nodes: usize,
    pub edges: usize,
}

/// The external graph database as seen by the indexer and the tool layer.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply the whole changeset or nothing.
    async fn apply(&self, changeset: &Changeset) -> Result<(), StoreError>;

    async fn query(&self, query: GraphQuery) -> Result<QueryResult, StoreError>;
}

fn unexpected(what: &str, got: QueryResult) -> StoreError {
    StoreError::Rejected(format!("expected {} result, got {:?}", what, got))
}

/// Typed helpers on top of [`GraphStore::query`].
#[async_trait]
pub trait GraphReader: GraphStore {
    async fn node(&self, fp: &Fingerprint) -> Result<Option<GraphNode>, StoreError> {
        match self.query(GraphQuery::Node(fp.clone())).await? {
            QueryResult::Node(node) => Ok(node),
            other => Err(unexpected("node", other)),
        }
    }

    async fn get_by_name(&self, kind: EntityKind, name: &str) -> Result<Vec<GraphNode>, StoreError> {
        let query = GraphQuery::ByName {
            kind,
            name: name.to_string(),
        };
        match self.query(query).await? {
            QueryResult::Nodes(nodes) => Ok(nodes),
            other => Err(unexpected("nodes", other)),
        }
    }

    async fn nodes_of_kind(&self, kind: EntityKind) -> Result<Vec<GraphNode>, StoreError> {
        match self.query(GraphQuery::OfKind(kind)).await? {
            QueryResult::Nodes(nodes) => Ok(nodes),
            other => Err(unexpected("nodes", other)),
        }
    }

    async fn nodes_in_file(&self, file: &str) -> Result<Vec<GraphNode>, StoreError> {
        match self.query(GraphQuery::InFile(file.to_string())).await? {
            QueryResult::Nodes(nodes) => Ok(nodes),
            other => Err(unexpected("nodes", other)),
        }
    }

    async fn get_inverse(
        &self,
        node: &Fingerprint,
        relation: EdgeKind,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let query = GraphQuery::Inverse {
            node: node.clone(),
            relation,
        };
        match self.query(query).await? {
            QueryResult::Neighbors(found) => Ok(found),
            other => Err(unexpected("neighbors", other)),
        }
    }

    async fn edges_of(&self, node: &Fingerprint) -> Result<Vec<GraphEdge>, StoreError> {
        match self.query(GraphQuery::Incident(node.clone())).await? {
            QueryResult::Edges(edges) => Ok(edges),
            other => Err(unexpected("edges", other)),
        }
    }

    async fn owned_edges(&self, file: &str) -> Result<Vec<GraphEdge>, StoreError> {
        match self.query(GraphQuery::OwnedEdges(file.to_string())).await? {
            QueryResult::Edges(edges) => Ok(edges),
            other => Err(unexpected("edges", other)),
        }
    }

    async fn get_embedding_neighbors(
        &self,
        vector: &[f32],
        k: usize,
        kinds: &[EntityKind],
    ) -> Result<Vec<ScoredNode>, StoreError> {
        let query = GraphQuery::EmbeddingNeighbors {
            vector: vector.to_vec(),
            k,
            kinds: kinds.to_vec(),
        };
        match self.query(query).await? {
            QueryResult::Scored(found) => Ok(found),
            other => Err(unexpected("scored", other)),
        }
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        match self.query(GraphQuery::Stats).await? {
            QueryResult::Stats(stats) => Ok(stats),
            other => Err(unexpected("stats", other)),
        }
    }
}

impl<S: GraphStore + ?Sized> GraphReader for S {}

/// Cosine similarity; zero when either vector has no magnitude or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
