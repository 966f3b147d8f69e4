//! Read-only code-intelligence operations over the graph store
//!
//! Every operation is idempotent and side-effect-free. Results are plain
//! serializable structs; the wire shape lives in `protocol`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use serde::Serialize;
use sett_core::{
    EdgeKind, EmbedError, Embedder, EntityKind, GraphNode, GraphReader, GraphStore, Language,
    Neighbor,
};
use tracing::debug;

use crate::error::ToolError;

/// Transitive include search stops at this depth.
pub const MAX_INCLUDE_DEPTH: usize = 20;

const IMPLEMENTATION_EXTS: &[&str] = &["c", "cc", "cpp", "cxx"];
const INTERFACE_EXTS: &[&str] = &["h", "hpp", "hh"];

// ── Result types ────────────────────────────────────────────

/// Where a symbol lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SymbolRef {
    pub file: String,
    pub line: u32,
    pub name: String,
    pub qualified_name: String,
    pub kind: EntityKind,
}

impl From<&GraphNode> for SymbolRef {
    fn from(node: &GraphNode) -> Self {
        SymbolRef {
            file: node.file_path.clone(),
            line: node.line_start,
            name: node.name.clone(),
            qualified_name: node.qualified_name.clone(),
            kind: node.kind,
        }
    }
}

/// One site referring to a definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Usage {
    /// Where the reference is made; the edge line when one was recorded.
    pub file: String,
    pub line: u32,
    pub by: SymbolRef,
    pub relation: EdgeKind,
    /// Qualified name of the definition being used.
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolUsages {
    pub symbol: String,
    pub symbol_type: String,
    pub definitions: Vec<SymbolRef>,
    pub usages: Vec<Usage>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionCallers {
    pub function: String,
    pub definitions: Vec<SymbolRef>,
    pub callers: Vec<Usage>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependent {
    pub file: String,
    /// The import text that matched.
    pub module: String,
    /// 1 for direct importers.
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncludeDependencies {
    pub file: String,
    pub dependencies: Vec<Dependent>,
    pub count: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldAccess {
    pub file: String,
    pub line: u32,
    pub scope: Option<String>,
    pub access_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldAccesses {
    pub struct_name: String,
    pub field_name: String,
    pub accesses: Vec<FieldAccess>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AffectedReason {
    pub file: String,
    pub changed_file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AffectedByType {
    pub direct_include: Vec<AffectedReason>,
    pub transitive_include: Vec<AffectedReason>,
    pub function_call: Vec<AffectedReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AffectedFiles {
    pub changed_files: Vec<String>,
    pub affected_files: Vec<String>,
    pub by_type: AffectedByType,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub symbol: SymbolRef,
    pub signature: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub count: usize,
}

// ── Tools ───────────────────────────────────────────────────

pub struct Tools {
    store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl Tools {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Definitions of `name` plus every site that uses them, following the
    /// inverse relation that fits `symbol_type`.
    pub async fn find_symbol_usages(
        &self,
        symbol_type: &str,
        name: &str,
    ) -> Result<SymbolUsages, ToolError> {
        let name = required("name", name)?;
        let (kind, relations) = usage_relations(symbol_type)?;
        let definitions = self.store.get_by_name(kind, name).await?;
        if definitions.is_empty() {
            return Err(ToolError::NotFound(format!("no {} named {}", symbol_type, name)));
        }

        let mut usages = BTreeSet::new();
        for def in &definitions {
            for &relation in relations {
                for found in self.store.get_inverse(&def.fingerprint, relation).await? {
                    usages.insert(usage(def, relation, found));
                }
            }
        }
        let usages: Vec<Usage> = usages.into_iter().collect();
        Ok(SymbolUsages {
            symbol: name.to_string(),
            symbol_type: symbol_type.to_string(),
            definitions: definitions.iter().map(SymbolRef::from).collect(),
            count: usages.len(),
            usages,
        })
    }

    /// Direct callers only; callers of callers need repeated calls.
    pub async fn get_function_callers(&self, name: &str) -> Result<FunctionCallers, ToolError> {
        let name = required("name", name)?;
        let definitions = self.store.get_by_name(EntityKind::Function, name).await?;
        if definitions.is_empty() {
            return Err(ToolError::NotFound(format!("no function named {}", name)));
        }
        let mut callers = BTreeSet::new();
        for def in &definitions {
            for found in self.store.get_inverse(&def.fingerprint, EdgeKind::Calls).await? {
                callers.insert(usage(def, EdgeKind::Calls, found));
            }
        }
        let callers: Vec<Usage> = callers.into_iter().collect();
        Ok(FunctionCallers {
            function: name.to_string(),
            definitions: definitions.iter().map(SymbolRef::from).collect(),
            count: callers.len(),
            callers,
        })
    }

    /// Files that import `file`, directly or through other importers.
    pub async fn get_include_dependencies(
        &self,
        file: &str,
    ) -> Result<IncludeDependencies, ToolError> {
        let file = normalize_path(file)?;
        let imports = self.imports().await?;
        let dependencies = include_closure(&file, &imports);
        Ok(IncludeDependencies {
            file,
            count: dependencies.len(),
            depth: dependencies.iter().map(|d| d.depth).max().unwrap_or(0),
            dependencies,
        })
    }

    pub async fn find_struct_field_access(
        &self,
        struct_name: &str,
        field_name: &str,
    ) -> Result<FieldAccesses, ToolError> {
        let struct_name = required("struct_name", struct_name)?;
        let struct_name = struct_name
            .strip_prefix("struct ")
            .unwrap_or(struct_name)
            .trim();
        let field_name = required("field_name", field_name)?;
        let key = format!("{}.{}", struct_name, field_name);

        let mut nodes = self
            .store
            .get_by_name(EntityKind::StructFieldAccess, &key)
            .await?;
        nodes.sort_by(|a, b| (&a.file_path, a.line_start).cmp(&(&b.file_path, b.line_start)));
        let accesses: Vec<FieldAccess> = nodes
            .iter()
            .map(|n| FieldAccess {
                file: n.file_path.clone(),
                line: n.line_start,
                scope: n.metadata.get("scope").filter(|s| *s != "<file>").cloned(),
                access_type: n.metadata.get("access_type").cloned(),
            })
            .collect();
        Ok(FieldAccesses {
            struct_name: struct_name.to_string(),
            field_name: field_name.to_string(),
            count: accesses.len(),
            accesses,
        })
    }

    /// Files to revisit when `files` change: include dependents of each
    /// plus files holding callers of the functions each defines.
    pub async fn check_affected_files(&self, files: &[String]) -> Result<AffectedFiles, ToolError> {
        if files.is_empty() {
            return Err(ToolError::InvalidArgument("files must not be empty".into()));
        }
        let changed: BTreeSet<String> = files
            .iter()
            .map(|f| normalize_path(f))
            .collect::<Result<_, _>>()?;
        let imports = self.imports().await?;

        let mut direct = BTreeSet::new();
        let mut transitive = BTreeSet::new();
        let mut calls = BTreeSet::new();
        for file in &changed {
            for dep in include_closure(file, &imports) {
                let reason = AffectedReason {
                    file: dep.file,
                    changed_file: file.clone(),
                    reason: format!("includes {}", dep.module),
                };
                if dep.depth == 1 {
                    direct.insert(reason);
                } else {
                    transitive.insert(reason);
                }
            }

            let functions = self.store.nodes_in_file(file).await?;
            for func in functions.iter().filter(|n| n.kind == EntityKind::Function) {
                for caller in self.store.get_inverse(&func.fingerprint, EdgeKind::Calls).await? {
                    if caller.node.file_path == *file {
                        continue;
                    }
                    calls.insert(AffectedReason {
                        file: caller.node.file_path.clone(),
                        changed_file: file.clone(),
                        reason: format!("calls {}", func.qualified_name),
                    });
                }
            }
        }

        let affected: BTreeSet<String> = direct
            .iter()
            .chain(&transitive)
            .chain(&calls)
            .map(|r| r.file.clone())
            .collect();
        debug!("{} changed files affect {} files", changed.len(), affected.len());
        Ok(AffectedFiles {
            changed_files: changed.into_iter().collect(),
            count: affected.len(),
            affected_files: affected.into_iter().collect(),
            by_type: AffectedByType {
                direct_include: direct.into_iter().collect(),
                transitive_include: transitive.into_iter().collect(),
                function_call: calls.into_iter().collect(),
            },
        })
    }

    /// Top `k` functions and classes by embedding similarity to `query`,
    /// optionally restricted to files matching `file_pattern`.
    pub async fn semantic_code_search(
        &self,
        query: &str,
        k: usize,
        file_pattern: Option<&str>,
    ) -> Result<SearchResults, ToolError> {
        let query = required("query", query)?;
        if k == 0 {
            return Err(ToolError::InvalidArgument("k must be at least 1".into()));
        }
        let matcher = match file_pattern.map(str::trim) {
            None | Some("") | Some("*") => None,
            Some(pattern) => Some(file_matcher(pattern)?),
        };
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| EmbedError::Request("no embedding provider configured".into()))?;

        let vector = embedder.embed(query).await?;
        // A filter can discard any share of the neighbors, so rank them all
        let fetch = match matcher {
            Some(_) => self.store.stats().await?.nodes.max(k),
            None => k,
        };
        let kinds = [EntityKind::Function, EntityKind::Class];
        let results: Vec<SearchHit> = self
            .store
            .get_embedding_neighbors(&vector, fetch, &kinds)
            .await?
            .into_iter()
            .filter(|s| {
                matcher
                    .as_ref()
                    .is_none_or(|m| matches_file(m, &s.node.file_path))
            })
            .take(k)
            .map(|s| SearchHit {
                signature: s.node.metadata.get("signature").cloned(),
                symbol: SymbolRef::from(&s.node),
                score: s.score,
            })
            .collect();
        Ok(SearchResults {
            query: query.to_string(),
            count: results.len(),
            results,
        })
    }

    async fn imports(&self) -> Result<Vec<GraphNode>, ToolError> {
        let mut imports = self.store.nodes_of_kind(EntityKind::Import).await?;
        imports.sort_by(|a, b| (&a.file_path, a.line_start).cmp(&(&b.file_path, b.line_start)));
        Ok(imports)
    }
}

fn required<'a>(what: &str, value: &'a str) -> Result<&'a str, ToolError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ToolError::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(value)
}

/// Entity kind and incoming relations for each `symbol_type`.
fn usage_relations(symbol_type: &str) -> Result<(EntityKind, &'static [EdgeKind]), ToolError> {
    const CALLS: &[EdgeKind] = &[EdgeKind::Calls];
    const MACRO: &[EdgeKind] = &[EdgeKind::UsesMacro];
    const VARIABLE: &[EdgeKind] = &[EdgeKind::Uses];
    const TYPEDEF: &[EdgeKind] = &[EdgeKind::UsesTypedef];
    const STRUCT: &[EdgeKind] = &[EdgeKind::AccessesStruct];
    const CLASS: &[EdgeKind] = &[EdgeKind::AccessesStruct, EdgeKind::Inherits];

    match symbol_type {
        "function" => Ok((EntityKind::Function, CALLS)),
        "macro" => Ok((EntityKind::Macro, MACRO)),
        "variable" => Ok((EntityKind::Variable, VARIABLE)),
        "typedef" => Ok((EntityKind::Typedef, TYPEDEF)),
        "struct" => Ok((EntityKind::Class, STRUCT)),
        "class" => Ok((EntityKind::Class, CLASS)),
        other => Err(ToolError::InvalidArgument(format!(
            "unknown symbol_type {}; expected function, macro, variable, struct, typedef or class",
            other
        ))),
    }
}

fn usage(def: &GraphNode, relation: EdgeKind, found: Neighbor) -> Usage {
    Usage {
        file: found.node.file_path.clone(),
        line: found.line.unwrap_or(found.node.line_start),
        by: SymbolRef::from(&found.node),
        relation: relation.inverse(),
        target: def.qualified_name.clone(),
    }
}

/// Workspace-relative, `/`-separated argument path.
fn normalize_path(path: &str) -> Result<String, ToolError> {
    let trimmed = path.trim().replace('\\', "/");
    let parts: Vec<&str> = trimmed
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        return Err(ToolError::InvalidArgument("file path must not be empty".into()));
    }
    Ok(parts.join("/"))
}

fn file_matcher(pattern: &str) -> Result<GlobMatcher, ToolError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| ToolError::InvalidArgument(format!("bad file_pattern {}: {}", pattern, e)))
}

/// Patterns match either the whole path or its file name.
fn matches_file(matcher: &GlobMatcher, path: &str) -> bool {
    matcher.is_match(path) || path.rsplit('/').next().is_some_and(|name| matcher.is_match(name))
}

// ── Include resolution ──────────────────────────────────────

/// Paths an import of `file` may be written as. Implementation files are
/// reached through their interface headers.
fn interface_paths(file: &str) -> Vec<String> {
    let mut out = vec![file.to_string()];
    let path = Path::new(file);
    let is_impl = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMPLEMENTATION_EXTS.contains(&e));
    if is_impl {
        let stem = &file[..file.len() - path.extension().map_or(0, |e| e.len() + 1)];
        out.extend(INTERFACE_EXTS.iter().map(|ext| format!("{}.{}", stem, ext)));
    }
    out
}

/// Relative file paths an import node can refer to.
fn module_paths(import: &GraphNode) -> Vec<String> {
    if import.language != Some(Language::Python) {
        return vec![import.name.clone()];
    }
    let module = import.name.trim_start_matches('.');
    let base = module.replace('.', "/");
    // `from pkg import mod` may name a submodule as well as an attribute
    let items = import
        .metadata
        .get("items")
        .into_iter()
        .flat_map(|items| items.split(','))
        .filter(|item| !item.is_empty() && *item != "*");
    let mut bases: Vec<String> = Vec::new();
    if !base.is_empty() {
        bases.push(base.clone());
    }
    for item in items {
        if base.is_empty() {
            bases.push(item.to_string());
        } else {
            bases.push(format!("{}/{}", base, item));
        }
    }
    bases
        .into_iter()
        .flat_map(|base| [format!("{}.py", base), format!("{}/__init__.py", base)])
        .collect()
}

/// True when the module's path components are a suffix of the file's.
fn is_path_suffix(module: &str, file: &str) -> bool {
    let module: Vec<&str> = module
        .split('/')
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();
    let file: Vec<&str> = file.split('/').collect();
    !module.is_empty() && file.ends_with(&module)
}

fn imports_file(import: &GraphNode, targets: &[String]) -> bool {
    let modules = module_paths(import);
    targets
        .iter()
        .any(|t| modules.iter().any(|m| is_path_suffix(m, t)))
}

/// Breadth-first reverse-import closure of `target`, ordered by depth
/// then path. `imports` must be sorted by file and line.
pub fn include_closure(target: &str, imports: &[GraphNode]) -> Vec<Dependent> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    seen.insert(target.to_string());
    let mut found = Vec::new();
    let mut frontier = vec![target.to_string()];

    for depth in 1..=MAX_INCLUDE_DEPTH {
        if frontier.is_empty() {
            break;
        }
        let mut level: BTreeMap<String, String> = BTreeMap::new();
        for current in &frontier {
            let targets = interface_paths(current);
            for import in imports {
                if seen.contains(&import.file_path) || level.contains_key(&import.file_path) {
                    continue;
                }
                if imports_file(import, &targets) {
                    level.insert(import.file_path.clone(), import.name.clone());
                }
            }
        }
        frontier = level.keys().cloned().collect();
        for (file, module) in level {
            seen.insert(file.clone());
            found.push(Dependent {
                file,
                module,
                depth,
            });
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use sett_core::{ContentHash, Fingerprint};

    fn import(file: &str, module: &str, line: u32) -> GraphNode {
        GraphNode {
            fingerprint: Fingerprint::new(EntityKind::Import, file, module),
            kind: EntityKind::Import,
            name: module.to_string(),
            qualified_name: module.to_string(),
            file_path: file.to_string(),
            line_start: line,
            line_end: line,
            language: Language::from_path(Path::new(file)),
            content_hash: ContentHash(String::new()),
            metadata: BTreeMap::new(),
            embedding: None,
        }
    }

    #[test]
    fn implementation_files_map_to_headers() {
        assert_eq!(
            interface_paths("src/net/sock.c"),
            vec!["src/net/sock.c", "src/net/sock.h", "src/net/sock.hpp", "src/net/sock.hh"]
        );
        assert_eq!(interface_paths("include/sock.h"), vec!["include/sock.h"]);
    }

    #[test]
    fn module_suffix_matching() {
        assert!(is_path_suffix("net/sock.h", "src/net/sock.h"));
        assert!(is_path_suffix("sock.h", "src/net/sock.h"));
        assert!(is_path_suffix("../net/sock.h", "src/net/sock.h"));
        assert!(!is_path_suffix("other/sock.h", "src/net/sock.h"));
        assert!(!is_path_suffix("ock.h", "src/net/sock.h"));
    }

    #[test]
    fn python_modules_become_paths() {
        let plain = import("app/main.py", "pkg.models", 1);
        assert_eq!(module_paths(&plain), vec!["pkg/models.py", "pkg/models/__init__.py"]);

        let relative = import("app/main.py", "..util", 2);
        assert_eq!(module_paths(&relative), vec!["util.py", "util/__init__.py"]);

        let mut siblings = import("app/main.py", ".", 3);
        siblings.metadata.insert("items".into(), "views".into());
        assert_eq!(module_paths(&siblings), vec!["views.py", "views/__init__.py"]);
    }

    #[test]
    fn imported_names_may_be_submodules() {
        let mut from = import("app.py", "pkg", 1);
        from.metadata.insert("items".into(), "mod,helper".into());
        assert_eq!(
            module_paths(&from),
            vec![
                "pkg.py",
                "pkg/__init__.py",
                "pkg/mod.py",
                "pkg/mod/__init__.py",
                "pkg/helper.py",
                "pkg/helper/__init__.py",
            ]
        );

        let deps = include_closure("pkg/mod.py", &[from]);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].file, "app.py");
    }

    #[test]
    fn closure_is_transitive_and_ordered() {
        let imports = vec![
            import("src/a.c", "util.h", 1),
            import("src/b.c", "api.h", 1),
            import("src/api.h", "util.h", 1),
            import("src/util.c", "util.h", 1),
            import("tools/x.py", "os", 1),
        ];
        let deps = include_closure("src/util.c", &imports);
        let got: Vec<(&str, usize)> = deps.iter().map(|d| (d.file.as_str(), d.depth)).collect();
        assert_eq!(got, vec![("src/a.c", 1), ("src/api.h", 1), ("src/b.c", 2)]);
        assert_eq!(deps[2].module, "api.h");
    }

    #[test]
    fn include_cycles_terminate() {
        let imports = vec![import("a.h", "b.h", 1), import("b.h", "a.h", 1)];
        let deps = include_closure("a.h", &imports);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].file, "b.h");
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("./src//a.c").unwrap(), "src/a.c");
        assert!(matches!(normalize_path("  "), Err(ToolError::InvalidArgument(_))));
    }

    #[test]
    fn patterns_match_path_or_file_name() {
        let m = file_matcher("*.c").unwrap();
        assert!(matches_file(&m, "src/deep/a.c"));
        let m = file_matcher("src/**").unwrap();
        assert!(matches_file(&m, "src/a.py"));
        assert!(!matches_file(&m, "lib/a.py"));
        assert!(file_matcher("src/[").is_err());
    }

    #[test]
    fn unknown_symbol_type_is_rejected() {
        assert!(matches!(usage_relations("enum"), Err(ToolError::InvalidArgument(_))));
        assert_eq!(usage_relations("struct").unwrap().0, EntityKind::Class);
    }
}
