//! Graph changesets produced by one indexing pass

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::*;

/// The inserts, updates and deletes produced by one indexing pass.
///
/// Edges always travel in pairs: every forward edge in `upsert_edges` or
/// `delete_edges` is accompanied by its inverse in the same list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Changeset {
    /// Monotonically increasing pass sequence number.
    pub sequence: u64,
    /// Drop everything in the namespace before applying the rest.
    pub purge_all: bool,
    /// Nodes created or replaced in place.
    pub upsert_nodes: Vec<GraphNode>,
    /// Edges created, both directions.
    pub upsert_edges: Vec<GraphEdge>,
    /// Nodes removed together with their incident edges.
    pub delete_nodes: Vec<Fingerprint>,
    /// Edges removed, both directions.
    pub delete_edges: Vec<EdgeKey>,
}

impl Changeset {
    pub fn new(sequence: u64) -> Self {
        Changeset {
            sequence,
            ..Default::default()
        }
    }

    /// Check if this changeset is empty (no changes).
    pub fn is_empty(&self) -> bool {
        !self.purge_all
            && self.upsert_nodes.is_empty()
            && self.upsert_edges.is_empty()
            && self.delete_nodes.is_empty()
            && self.delete_edges.is_empty()
    }

    /// Add an edge and its inverse.
    pub fn upsert_pair(&mut self, edge: GraphEdge) {
        let inverse = edge.inverse();
        self.upsert_edges.push(edge);
        self.upsert_edges.push(inverse);
    }

    /// Remove an edge and its inverse.
    pub fn delete_pair(&mut self, key: EdgeKey) {
        let inverse = key.inverse();
        self.delete_edges.push(key);
        self.delete_edges.push(inverse);
    }

    /// Verify that every edge in the changeset has its counterpart.
    pub fn check_pairs(&self) -> Result<(), String> {
        let upserts: HashSet<EdgeKey> = self.upsert_edges.iter().map(GraphEdge::key).collect();
        if let Some(edge) = self
            .upsert_edges
            .iter()
            .find(|e| !upserts.contains(&e.key().inverse()))
        {
            return Err(format!(
                "edge {} -[{:?}]-> {} has no inverse",
                edge.source, edge.kind, edge.target
            ));
        }

        let deletes: HashSet<&EdgeKey> = self.delete_edges.iter().collect();
        if let Some(key) = self
            .delete_edges
            .iter()
            .find(|k| !deletes.contains(&k.inverse()))
        {
            return Err(format!(
                "edge deletion {} -[{:?}]-> {} has no inverse",
                key.source, key.kind, key.target
            ));
        }
        Ok(())
    }
}
