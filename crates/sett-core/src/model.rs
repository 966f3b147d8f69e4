//! Core data structures for the code graph

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Discriminates what kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    // ── Structural ──────────────────────────────────────────
    File,
    Import,

    // ── Code entities (tree-sitter extracted) ───────────────
    Function,
    /// Classes, structs, unions and enums.
    Class,
    Variable,
    Macro,
    Typedef,
    StructFieldAccess,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::File,
        EntityKind::Import,
        EntityKind::Function,
        EntityKind::Class,
        EntityKind::Variable,
        EntityKind::Macro,
        EntityKind::Typedef,
        EntityKind::StructFieldAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Import => "import",
            EntityKind::Function => "function",
            EntityKind::Class => "class",
            EntityKind::Variable => "variable",
            EntityKind::Macro => "macro",
            EntityKind::Typedef => "typedef",
            EntityKind::StructFieldAccess => "struct_field_access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Kinds that receive an embedding vector.
    pub fn is_embeddable(&self) -> bool {
        matches!(self, EntityKind::Function | EntityKind::Class)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported languages for syntax-aware parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cpp,
    Python,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") | Some("h") => Some(Language::C),
            Some("cpp") | Some("cc") | Some("cxx") | Some("hpp") | Some("hh") | Some("hxx") => {
                Some(Language::Cpp)
            }
            Some("py") => Some(Language::Python),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
        }
    }
}

/// Stable identity key: `<kind>::<relative path>::<qualified name>`.
///
/// Independent of content. Two entities in one workspace never share a
/// fingerprint because qualified names are disambiguated per file before
/// fingerprints are built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    const SEP: &'static str = "::";

    pub fn new(kind: EntityKind, file_path: &str, qualified_name: &str) -> Self {
        Fingerprint(format!(
            "{}{sep}{}{sep}{}",
            kind.as_str(),
            file_path,
            qualified_name,
            sep = Self::SEP
        ))
    }

    /// Fingerprint of the File entity for `file_path`.
    pub fn file(file_path: &str) -> Self {
        Self::new(EntityKind::File, file_path, file_path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Option<EntityKind> {
        self.0.split(Self::SEP).next().and_then(EntityKind::parse)
    }

    /// Recover the file path without touching the graph. Paths never contain
    /// `::`, qualified names may.
    pub fn file_path(&self) -> Option<&str> {
        let mut parts = self.0.splitn(3, Self::SEP);
        parts.next()?;
        let path = parts.next()?;
        parts.next()?;
        Some(path)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_string())
    }
}

/// SHA-256 hex digest of an entity's defining span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of relationship this edge represents. Every forward kind has a
/// mandatory inverse that is stored as its own edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    // ── Containment ─────────────────────────────────────────
    Contains,
    ContainedIn,

    // ── Structural (deterministic, from AST) ────────────────
    Calls,
    CalledBy,
    Inherits,
    InheritedBy,
    Uses,
    UsedBy,
    UsesMacro,
    MacroUsedIn,
    UsesTypedef,
    TypedefUsedIn,
    AccessesStruct,
    AccessedBy,
}

impl EdgeKind {
    pub const FORWARD: [EdgeKind; 7] = [
        EdgeKind::Contains,
        EdgeKind::Calls,
        EdgeKind::Inherits,
        EdgeKind::Uses,
        EdgeKind::UsesMacro,
        EdgeKind::UsesTypedef,
        EdgeKind::AccessesStruct,
    ];

    pub fn inverse(&self) -> EdgeKind {
        match self {
            EdgeKind::Contains => EdgeKind::ContainedIn,
            EdgeKind::ContainedIn => EdgeKind::Contains,
            EdgeKind::Calls => EdgeKind::CalledBy,
            EdgeKind::CalledBy => EdgeKind::Calls,
            EdgeKind::Inherits => EdgeKind::InheritedBy,
            EdgeKind::InheritedBy => EdgeKind::Inherits,
            EdgeKind::Uses => EdgeKind::UsedBy,
            EdgeKind::UsedBy => EdgeKind::Uses,
            EdgeKind::UsesMacro => EdgeKind::MacroUsedIn,
            EdgeKind::MacroUsedIn => EdgeKind::UsesMacro,
            EdgeKind::UsesTypedef => EdgeKind::TypedefUsedIn,
            EdgeKind::TypedefUsedIn => EdgeKind::UsesTypedef,
            EdgeKind::AccessesStruct => EdgeKind::AccessedBy,
            EdgeKind::AccessedBy => EdgeKind::AccessesStruct,
        }
    }

    pub fn is_forward(&self) -> bool {
        Self::FORWARD.contains(self)
    }
}

/// A single node in the code graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub fingerprint: Fingerprint,
    pub kind: EntityKind,
    pub name: String,
    pub qualified_name: String,
    /// Workspace-relative, `/`-separated.
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub language: Option<Language>,
    pub content_hash: ContentHash,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Option<Vec<f32>>,
}

/// Identity of an edge inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: Fingerprint,
    pub kind: EdgeKind,
    pub target: Fingerprint,
}

impl EdgeKey {
    pub fn inverse(&self) -> EdgeKey {
        EdgeKey {
            source: self.target.clone(),
            kind: self.kind.inverse(),
            target: self.source.clone(),
        }
    }
}

/// A directed edge in the code graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: Fingerprint,
    pub target: Fingerprint,
    pub kind: EdgeKind,
    /// Where in source this relationship is expressed.
    pub line: Option<u32>,
}

impl GraphEdge {
    pub fn new(source: Fingerprint, kind: EdgeKind, target: Fingerprint, line: Option<u32>) -> Self {
        GraphEdge {
            source,
            target,
            kind,
            line,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            kind: self.kind,
            target: self.target.clone(),
        }
    }

    /// The opposite-direction counterpart, carrying the same source line.
    pub fn inverse(&self) -> GraphEdge {
        GraphEdge {
            source: self.target.clone(),
            target: self.source.clone(),
            kind: self.kind.inverse(),
            line: self.line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::new(EntityKind::Function, "src/a.c", "main");
        let b = Fingerprint::new(EntityKind::Function, "src/a.c", "main");
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::new(EntityKind::Variable, "src/a.c", "main"));
        assert_ne!(a, Fingerprint::new(EntityKind::Function, "src/b.c", "main"));
    }

    #[test]
    fn fingerprint_recovers_path_and_kind() {
        let fp = Fingerprint::new(EntityKind::Function, "lib/ns.cpp", "Outer::inner");
        assert_eq!(fp.file_path(), Some("lib/ns.cpp"));
        assert_eq!(fp.kind(), Some(EntityKind::Function));
        insta::assert_snapshot!(fp.as_str(), @"function::lib/ns.cpp::Outer::inner");
    }

    #[test]
    fn file_fingerprint_uses_path_as_name() {
        let fp = Fingerprint::file("a/b.py");
        assert_eq!(fp.as_str(), "file::a/b.py::a/b.py");
        assert_eq!(fp.file_path(), Some("a/b.py"));
    }

    #[test]
    fn every_edge_kind_round_trips_through_inverse() {
        for kind in EdgeKind::FORWARD {
            assert!(kind.is_forward());
            assert!(!kind.inverse().is_forward());
            assert_eq!(kind.inverse().inverse(), kind);
        }
    }

    #[test]
    fn edge_inverse_swaps_endpoints() {
        let a = Fingerprint::new(EntityKind::Function, "a.c", "f");
        let b = Fingerprint::new(EntityKind::Function, "b.c", "g");
        let edge = GraphEdge::new(a.clone(), EdgeKind::Calls, b.clone(), Some(4));
        let inv = edge.inverse();
        assert_eq!(inv.source, b);
        assert_eq!(inv.target, a);
        assert_eq!(inv.kind, EdgeKind::CalledBy);
        assert_eq!(inv.line, Some(4));
        assert_eq!(edge.key().inverse(), inv.key());
    }

    #[test]
    fn language_detection() {
        assert_eq!(Language::from_path(Path::new("x/y.h")), Some(Language::C));
        assert_eq!(Language::from_path(Path::new("y.hpp")), Some(Language::Cpp));
        assert_eq!(Language::from_path(Path::new("y.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("y.rs")), None);
    }
}
