//! Language parser contract and the facts a parse produces

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use sett_core::{ContentHash, EntityKind, Fingerprint, GraphNode, Language, content_hash};
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::error::ParseError;

/// Optional extraction features. Functions, classes, variables and imports
/// are required of every parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub macros: bool,
    pub typedefs: bool,
    pub field_accesses: bool,
}

/// Source location of an entity. Lines are 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl Span {
    pub fn of(node: Node) -> Self {
        Span {
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
        }
    }
}

/// One extracted definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    /// Unique within the file.
    pub qualified_name: String,
    pub span: Span,
    /// Defining span text, hashed for change detection.
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// `caller` calls something named `callee` at `line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFact {
    /// Qualified name of the enclosing function.
    pub caller: String,
    /// Callee as written: bare, `a.b`, `ns::f` or `p->f`.
    pub callee: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageKind {
    /// A value identifier: variable or object-like macro.
    Identifier,
    /// A type name: typedef.
    Type,
}

/// A name referenced somewhere in the file, resolved later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFact {
    pub kind: UsageKind,
    pub name: String,
    /// Qualified name of the enclosing function, if any.
    pub scope: Option<String>,
    pub line: u32,
}

/// `class` names `base` as a base class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFact {
    pub class: String,
    pub base: String,
    pub line: u32,
}

/// Everything one parse of one file produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    /// Workspace-relative, `/`-separated.
    pub path: String,
    pub language: Language,
    pub entities: Vec<Entity>,
    pub calls: Vec<CallFact>,
    pub usages: Vec<UsageFact>,
    pub bases: Vec<BaseFact>,
    /// Facts dropped on purpose, for debug logging.
    pub dropped: Vec<String>,
}

impl ParsedFile {
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    pub fn fingerprint(&self, entity: &Entity) -> Fingerprint {
        Fingerprint::new(entity.kind, &self.path, &entity.qualified_name)
    }

    /// Graph nodes for every entity, File node first.
    pub fn to_nodes(&self) -> Vec<GraphNode> {
        self.entities
            .iter()
            .map(|e| GraphNode {
                fingerprint: self.fingerprint(e),
                kind: e.kind,
                name: e.name.clone(),
                qualified_name: e.qualified_name.clone(),
                file_path: self.path.clone(),
                line_start: e.span.start_line,
                line_end: e.span.end_line,
                language: Some(self.language),
                content_hash: content_hash(e.kind, &e.text),
                metadata: e.metadata.clone(),
                embedding: None,
            })
            .collect()
    }

    pub fn hashes(&self) -> impl Iterator<Item = (Fingerprint, ContentHash)> + '_ {
        self.entities
            .iter()
            .map(|e| (self.fingerprint(e), content_hash(e.kind, &e.text)))
    }
}

/// Extracts entities and facts from one file's text.
///
/// Implementations are stateless and shared across parse workers.
pub trait LanguageParser: Send + Sync {
    fn language(&self) -> Language;

    fn capabilities(&self) -> Capabilities;

    /// `path` is workspace-relative and ends up in every fact.
    fn parse(&self, source: &str, path: &str) -> Result<ParsedFile, ParseError>;
}

/// Parse `source` with a freshly configured tree-sitter parser.
pub(crate) fn parse_tree(
    grammar: tree_sitter::Language,
    language: Language,
    source: &str,
    path: &str,
) -> Result<tree_sitter::Tree, ParseError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| ParseError::Grammar {
            language: language.as_str().to_string(),
            message: e.to_string(),
        })?;
    parser
        .parse(source, None)
        .ok_or_else(|| ParseError::NoTree(path.into()))
}

/// Node text, or "" if the range is not valid UTF-8.
pub(crate) fn text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

pub(crate) fn line(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// Accumulates entities and facts for one file, keeping qualified names
/// unique in parse order.
pub(crate) struct Sink {
    file: ParsedFile,
    taken: HashMap<(EntityKind, String), u32>,
    accesses: HashMap<String, u32>,
    seen_usages: HashSet<(UsageKind, Option<String>, String)>,
}

impl Sink {
    pub fn new(path: &str, language: Language, source: &str) -> Self {
        let lines = source.lines().count().max(1) as u32;
        let file_entity = Entity {
            kind: EntityKind::File,
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            qualified_name: path.to_string(),
            span: Span {
                start_line: 1,
                end_line: lines,
                start_byte: 0,
                end_byte: source.len(),
            },
            // The file node's identity is its path; edits to its contents
            // show up on the contained entities instead.
            text: format!("{}:{}", language.as_str(), path),
            metadata: BTreeMap::new(),
        };
        Sink {
            file: ParsedFile {
                path: path.to_string(),
                language,
                entities: vec![file_entity],
                calls: Vec::new(),
                usages: Vec::new(),
                bases: Vec::new(),
                dropped: Vec::new(),
            },
            taken: HashMap::new(),
            accesses: HashMap::new(),
            seen_usages: HashSet::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.file.path
    }

    /// Record an entity; returns the qualified name it was stored under.
    pub fn entity(
        &mut self,
        kind: EntityKind,
        name: &str,
        qualified: &str,
        node: Node,
        source: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> String {
        let count = self.taken.entry((kind, qualified.to_string())).or_insert(0);
        *count += 1;
        let qualified_name = if *count == 1 {
            qualified.to_string()
        } else {
            format!("{}#{}", qualified, count)
        };
        self.file.entities.push(Entity {
            kind,
            name: name.to_string(),
            qualified_name: qualified_name.clone(),
            span: Span::of(node),
            text: text(node, source).to_string(),
            metadata,
        });
        qualified_name
    }

    /// Record a field access; its qualified name carries the occurrence
    /// index within `scope` so it is stable when unrelated code moves.
    pub fn field_access(
        &mut self,
        scope: Option<&str>,
        struct_name: &str,
        field: &str,
        access_type: &str,
        node: Node,
        source: &[u8],
    ) {
        let scope = scope.unwrap_or("<file>");
        let base = format!("{}:{}.{}", scope, struct_name, field);
        let n = self.accesses.entry(base.clone()).or_insert(0);
        *n += 1;
        let qualified = format!("{}#{}", base, n);
        let mut metadata = BTreeMap::new();
        metadata.insert("struct".to_string(), struct_name.to_string());
        metadata.insert("field".to_string(), field.to_string());
        metadata.insert("access_type".to_string(), access_type.to_string());
        metadata.insert("scope".to_string(), scope.to_string());
        let name = format!("{}.{}", struct_name, field);
        self.entity(EntityKind::StructFieldAccess, &name, &qualified, node, source, metadata);
    }

    pub fn call(&mut self, caller: &str, callee: &str, line: u32) {
        self.file.calls.push(CallFact {
            caller: caller.to_string(),
            callee: callee.to_string(),
            file: self.file.path.clone(),
            line,
        });
    }

    /// Record a usage; only the first per kind, scope and name is kept.
    pub fn usage(&mut self, kind: UsageKind, name: &str, scope: Option<&str>, line: u32) {
        let key = (kind, scope.map(str::to_string), name.to_string());
        if !self.seen_usages.insert(key) {
            return;
        }
        self.file.usages.push(UsageFact {
            kind,
            name: name.to_string(),
            scope: scope.map(str::to_string),
            line,
        });
    }

    pub fn base(&mut self, class: &str, base: &str, line: u32) {
        self.file.bases.push(BaseFact {
            class: class.to_string(),
            base: base.to_string(),
            line,
        });
    }

    pub fn drop_fact(&mut self, why: String) {
        self.file.dropped.push(why);
    }

    pub fn finish(self) -> ParsedFile {
        self.file
    }
}

/// Parsers by language, constructed once and injected where needed.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// C, C++ and Python.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::languages::c::CFamilyParser::c()));
        registry.register(Arc::new(crate::languages::c::CFamilyParser::cpp()));
        registry.register(Arc::new(crate::languages::python::PythonParser::new()));
        registry
    }

    /// Register a parser, replacing any previous one for its language.
    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        self.parsers.retain(|p| p.language() != parser.language());
        self.parsers.push(parser);
    }

    pub fn get(&self, language: Language) -> Option<&dyn LanguageParser> {
        self.parsers
            .iter()
            .find(|p| p.language() == language)
            .map(|p| p.as_ref())
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn LanguageParser> {
        Language::from_path(path).and_then(|lang| self.get(lang))
    }

    pub fn languages(&self) -> Vec<Language> {
        self.parsers.iter().map(|p| p.language()).collect()
    }

    /// Read and parse one workspace file.
    pub fn parse_file(&self, root: &Path, rel: &str) -> Result<ParsedFile, ParseError> {
        let abs = root.join(rel);
        let parser = self
            .for_path(&abs)
            .ok_or_else(|| ParseError::Unsupported(abs.clone()))?;
        let bytes = std::fs::read(&abs).map_err(|source| ParseError::Io {
            path: abs.clone(),
            source,
        })?;
        let source = String::from_utf8(bytes).map_err(|_| ParseError::Utf8(abs.clone()))?;
        parser.parse(&source, rel)
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}
