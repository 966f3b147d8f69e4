//! Builders for graph fixtures used across unit tests

use std::collections::BTreeMap;

use crate::hash::content_hash;
use crate::model::*;

pub fn node(kind: EntityKind, file: &str, name: &str) -> GraphNode {
    GraphNode {
        fingerprint: Fingerprint::new(kind, file, name),
        kind,
        name: name.rsplit('.').next().unwrap_or(name).to_string(),
        qualified_name: name.to_string(),
        file_path: file.to_string(),
        line_start: 1,
        line_end: 1,
        language: Language::from_path(std::path::Path::new(file)),
        content_hash: content_hash(kind, name),
        metadata: BTreeMap::new(),
        embedding: None,
    }
}

pub fn function(file: &str, name: &str) -> GraphNode {
    node(EntityKind::Function, file, name)
}
