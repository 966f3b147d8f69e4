//! Turns parsed facts into a minimal changeset
//!
//! The builder owns the forward edges whose source lives in an in-scope
//! file. It recomputes that set from the fresh parse, diffs it against what
//! the store holds, and emits every change as a forward/inverse pair.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use sett_core::{
    Changeset, Classification, EdgeKey, EdgeKind, EntityKind, Fingerprint, GraphEdge, GraphNode,
};
use tracing::debug;

use crate::extractor::{ParsedFile, UsageKind};

/// Text handed to the embedder is capped at this many characters.
pub const EMBED_TEXT_LIMIT: usize = 2000;

/// Store nodes outside the pass scope that facts may resolve to.
#[derive(Debug, Clone, Default)]
pub struct ExternalSymbols {
    nodes: BTreeMap<Fingerprint, GraphNode>,
}

impl ExternalSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = GraphNode>) {
        for node in nodes {
            self.nodes.entry(node.fingerprint.clone()).or_insert(node);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }
}

/// Names, by kind, that facts in `parsed` may resolve to. The indexer
/// prefetches these from the store before building.
pub fn wanted_names(parsed: &[ParsedFile]) -> BTreeSet<(EntityKind, String)> {
    let mut wanted = BTreeSet::new();
    for file in parsed {
        for call in &file.calls {
            wanted.insert((EntityKind::Function, call.callee.clone()));
            wanted.insert((EntityKind::Function, bare_name(&call.callee).to_string()));
        }
        for base in &file.bases {
            wanted.insert((EntityKind::Class, base.base.clone()));
            wanted.insert((EntityKind::Class, bare_name(&base.base).to_string()));
        }
        for usage in &file.usages {
            match usage.kind {
                UsageKind::Identifier => {
                    wanted.insert((EntityKind::Macro, usage.name.clone()));
                    if usage.scope.is_some() {
                        wanted.insert((EntityKind::Variable, usage.name.clone()));
                    }
                }
                UsageKind::Type => {
                    wanted.insert((EntityKind::Typedef, usage.name.clone()));
                }
            }
        }
        for access in file.entities_of(EntityKind::StructFieldAccess) {
            if let Some(name) = access.metadata.get("struct") {
                wanted.insert((EntityKind::Class, name.clone()));
                wanted.insert((EntityKind::Typedef, name.clone()));
            }
        }
    }
    wanted
}

/// Everything the builder needs for one pass.
pub struct BuildInput<'a> {
    pub sequence: u64,
    pub purge_all: bool,
    /// Successfully parsed in-scope files, sorted by path.
    pub parsed: &'a [ParsedFile],
    pub classification: &'a Classification,
    pub external: &'a ExternalSymbols,
    /// Forward edges the store holds for in-scope files.
    pub existing_owned: &'a [GraphEdge],
    /// Edges touching nodes that this pass removes.
    pub removed_incident: &'a [GraphEdge],
}

#[derive(Debug, Clone, Default)]
pub struct Build {
    pub changeset: Changeset,
    pub unresolved_calls: usize,
    /// Embedding input for each upserted Function/Class node.
    pub embed_texts: BTreeMap<Fingerprint, String>,
}

/// Node lookup by name and qualified name, in file-processing order.
struct SymbolTable {
    nodes: Vec<GraphNode>,
    by_qualified: HashMap<(EntityKind, String), Vec<usize>>,
    by_name: HashMap<(EntityKind, String), Vec<usize>>,
}

impl SymbolTable {
    fn new(parsed: &[ParsedFile], external: &ExternalSymbols) -> Self {
        let mut outside: Vec<GraphNode> = external.iter().cloned().collect();
        outside.sort_by(|a, b| {
            (&a.file_path, a.line_start, &a.fingerprint).cmp(&(&b.file_path, b.line_start, &b.fingerprint))
        });
        let mut nodes: Vec<GraphNode> = parsed.iter().flat_map(|f| f.to_nodes()).collect();
        nodes.extend(outside);
        // Stable: keeps parse order inside each file
        nodes.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        let mut by_qualified: HashMap<(EntityKind, String), Vec<usize>> = HashMap::new();
        let mut by_name: HashMap<(EntityKind, String), Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            by_qualified
                .entry((node.kind, node.qualified_name.clone()))
                .or_default()
                .push(i);
            by_name.entry((node.kind, node.name.clone())).or_default().push(i);
        }
        SymbolTable {
            nodes,
            by_qualified,
            by_name,
        }
    }

    fn get(&self, map: &HashMap<(EntityKind, String), Vec<usize>>, kind: EntityKind, key: &str) -> Vec<&GraphNode> {
        map.get(&(kind, key.to_string()))
            .map(|ids| ids.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    fn qualified(&self, kind: EntityKind, name: &str) -> Vec<&GraphNode> {
        self.get(&self.by_qualified, kind, name)
    }

    fn named(&self, kind: EntityKind, name: &str) -> Vec<&GraphNode> {
        self.get(&self.by_name, kind, name)
    }

    /// Exact qualified match, else match on the bare trailing name.
    fn resolve(&self, kind: EntityKind, reference: &str, file: &str) -> Option<&GraphNode> {
        let exact = self.qualified(kind, reference);
        if !exact.is_empty() {
            return pick(&exact, file);
        }
        pick(&self.named(kind, bare_name(reference)), file)
    }

    /// Same file first, else first in file-processing order.
    fn resolve_near(&self, kind: EntityKind, name: &str, file: &str) -> Option<&GraphNode> {
        pick(&self.named(kind, name), file)
    }

    /// Local of `scope`, else a global of the same file, else the first
    /// global elsewhere.
    fn resolve_variable(&self, name: &str, scope: &str, file: &str) -> Option<&GraphNode> {
        let local = format!("{}.{}", scope, name);
        if let Some(node) = self
            .qualified(EntityKind::Variable, &local)
            .into_iter()
            .find(|n| n.file_path == file)
        {
            return Some(node);
        }
        let globals: Vec<&GraphNode> = self
            .named(EntityKind::Variable, name)
            .into_iter()
            .filter(|n| !n.metadata.contains_key("scope"))
            .collect();
        pick(&globals, file)
    }

    /// Class named `name`, else a typedef aliasing `struct X` to class `X`.
    fn resolve_struct(&self, name: &str, file: &str) -> Option<&GraphNode> {
        if let Some(class) = self.resolve_near(EntityKind::Class, name, file) {
            return Some(class);
        }
        let typedef = self.resolve_near(EntityKind::Typedef, name, file)?;
        let underlying = typedef.metadata.get("underlying_type")?;
        let target = record_tag(underlying)?;
        self.resolve_near(EntityKind::Class, target, &typedef.file_path)
    }
}

fn pick<'n>(candidates: &[&'n GraphNode], file: &str) -> Option<&'n GraphNode> {
    candidates
        .iter()
        .find(|n| n.file_path == file)
        .or_else(|| candidates.first())
        .copied()
}

/// Trailing component of `a.b`, `ns::f` or `p->f`.
pub fn bare_name(reference: &str) -> &str {
    let cut = [
        reference.rfind("::").map(|i| i + 2),
        reference.rfind("->").map(|i| i + 2),
        reference.rfind('.').map(|i| i + 1),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(0);
    &reference[cut..]
}

/// `X` from `struct X`, `union X` or `enum X`.
pub fn record_tag(underlying: &str) -> Option<&str> {
    let mut words = underlying.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("struct" | "union" | "enum"), Some(tag), None) => Some(tag),
        _ => None,
    }
}

/// Forward edges implied by the fresh parse, keyed by identity. The first
/// line a relationship was seen on wins.
struct DesiredEdges {
    edges: BTreeMap<EdgeKey, Option<u32>>,
    unresolved_calls: usize,
}

impl DesiredEdges {
    fn add(&mut self, source: Fingerprint, kind: EdgeKind, target: &GraphNode, line: Option<u32>) {
        let key = EdgeKey {
            source,
            kind,
            target: target.fingerprint.clone(),
        };
        self.edges.entry(key).or_insert(line);
    }
}

fn desired_edges(parsed: &[ParsedFile], table: &SymbolTable) -> DesiredEdges {
    let mut out = DesiredEdges {
        edges: BTreeMap::new(),
        unresolved_calls: 0,
    };

    for file in parsed {
        let path = file.path.as_str();
        let file_fp = Fingerprint::file(path);

        for node in file.to_nodes().iter().filter(|n| n.kind != EntityKind::File) {
            out.add(file_fp.clone(), EdgeKind::Contains, node, None);
        }

        for call in &file.calls {
            let caller = Fingerprint::new(EntityKind::Function, path, &call.caller);
            match table.resolve(EntityKind::Function, &call.callee, path) {
                Some(target) => out.add(caller, EdgeKind::Calls, target, Some(call.line)),
                None => {
                    out.unresolved_calls += 1;
                    debug!(
                        "Unresolved call {} -> {} at {}:{}",
                        call.caller, call.callee, path, call.line
                    );
                }
            }
        }

        for base in &file.bases {
            let class = Fingerprint::new(EntityKind::Class, path, &base.class);
            match table.resolve(EntityKind::Class, &base.base, path) {
                Some(target) => out.add(class, EdgeKind::Inherits, target, Some(base.line)),
                None => debug!("Unresolved base class {} of {} in {}", base.base, base.class, path),
            }
        }

        for usage in &file.usages {
            match usage.kind {
                UsageKind::Identifier => {
                    if let Some(scope) = &usage.scope {
                        if let Some(var) = table.resolve_variable(&usage.name, scope, path) {
                            let func = Fingerprint::new(EntityKind::Function, path, scope);
                            out.add(func, EdgeKind::Uses, var, Some(usage.line));
                        }
                    }
                    if let Some(mac) = table.resolve_near(EntityKind::Macro, &usage.name, path) {
                        out.add(file_fp.clone(), EdgeKind::UsesMacro, mac, Some(usage.line));
                    }
                }
                UsageKind::Type => {
                    if let Some(td) = table.resolve_near(EntityKind::Typedef, &usage.name, path) {
                        out.add(file_fp.clone(), EdgeKind::UsesTypedef, td, Some(usage.line));
                    }
                }
            }
        }

        for access in file.entities_of(EntityKind::StructFieldAccess) {
            let Some(name) = access.metadata.get("struct") else {
                continue;
            };
            if let Some(class) = table.resolve_struct(name, path) {
                let source = file.fingerprint(access);
                out.add(source, EdgeKind::AccessesStruct, class, Some(access.span.start_line));
            }
        }
    }
    out
}

fn embed_text(node: &GraphNode, body: &str) -> String {
    let mut text = format!("{} {}\n", node.kind, node.qualified_name);
    if let Some(signature) = node.metadata.get("signature") {
        text.push_str(signature);
        text.push('\n');
    }
    text.push_str(body);
    match text.char_indices().nth(EMBED_TEXT_LIMIT) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

/// Compute the changeset for one pass.
pub fn build(input: BuildInput<'_>) -> Build {
    let table = SymbolTable::new(input.parsed, input.external);
    let desired = desired_edges(input.parsed, &table);
    let classification = input.classification;

    let mut changeset = Changeset::new(input.sequence);
    changeset.purge_all = input.purge_all;

    let mut embed_texts = BTreeMap::new();
    for file in input.parsed {
        for (entity, node) in file.entities.iter().zip(file.to_nodes()) {
            if !classification.needs_write(&node.fingerprint) {
                continue;
            }
            if node.kind.is_embeddable() {
                embed_texts.insert(node.fingerprint.clone(), embed_text(&node, &entity.text));
            }
            changeset.upsert_nodes.push(node);
        }
    }
    changeset.delete_nodes = classification.removed.iter().cloned().collect();

    let existing: BTreeMap<EdgeKey, Option<u32>> = input
        .existing_owned
        .iter()
        .filter(|e| e.kind.is_forward())
        .map(|e| (e.key(), e.line))
        .collect();

    for (key, line) in &desired.edges {
        let refresh = match existing.get(key) {
            None => true,
            // Lines are refreshed only for edges of rewritten nodes
            Some(old) => old != line && classification.needs_write(&key.source),
        };
        if refresh {
            changeset.upsert_pair(GraphEdge::new(key.source.clone(), key.kind, key.target.clone(), *line));
        }
    }

    let mut doomed: BTreeSet<EdgeKey> = existing
        .keys()
        .filter(|k| !desired.edges.contains_key(*k))
        .cloned()
        .collect();
    for edge in input.removed_incident {
        let key = if edge.kind.is_forward() {
            edge.key()
        } else {
            edge.key().inverse()
        };
        if !desired.edges.contains_key(&key) {
            doomed.insert(key);
        }
    }
    for key in doomed {
        changeset.delete_pair(key);
    }

    debug!(
        "Built changeset #{}: +{} nodes, -{} nodes, +{} edges, -{} edges, {} unresolved calls",
        changeset.sequence,
        changeset.upsert_nodes.len(),
        changeset.delete_nodes.len(),
        changeset.upsert_edges.len(),
        changeset.delete_edges.len(),
        desired.unresolved_calls
    );

    Build {
        changeset,
        unresolved_calls: desired.unresolved_calls,
        embed_texts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::LanguageParser;
    use crate::languages::{CFamilyParser, PythonParser};
    use sett_core::HashCache;

    fn parse_c(path: &str, src: &str) -> ParsedFile {
        CFamilyParser::c().parse(src, path).unwrap()
    }

    fn classify(parsed: &[ParsedFile], cache: &HashCache) -> Classification {
        let scope = parsed.iter().map(|f| f.path.clone()).collect();
        let fresh = parsed.iter().flat_map(|f| f.hashes()).collect();
        cache.classify(&scope, &fresh)
    }

    fn build_fresh(parsed: &[ParsedFile]) -> Build {
        let classification = classify(parsed, &HashCache::new("/ws"));
        build(BuildInput {
            sequence: 1,
            purge_all: false,
            parsed,
            classification: &classification,
            external: &ExternalSymbols::new(),
            existing_owned: &[],
            removed_incident: &[],
        })
    }

    fn has_edge(cs: &Changeset, source: &Fingerprint, kind: EdgeKind, target: &Fingerprint) -> bool {
        cs.upsert_edges
            .iter()
            .any(|e| &e.source == source && e.kind == kind && &e.target == target)
    }

    #[test]
    fn bare_names_and_record_tags() {
        assert_eq!(bare_name("ns::Foo::bar"), "bar");
        assert_eq!(bare_name("self.helper"), "helper");
        assert_eq!(bare_name("p->run"), "run");
        assert_eq!(bare_name("plain"), "plain");
        assert_eq!(record_tag("struct point"), Some("point"));
        assert_eq!(record_tag("unsigned int"), None);
    }

    #[test]
    fn every_edge_has_its_inverse() {
        let parsed = vec![
            parse_c(
                "src/a.c",
                "#define N 2\nint g;\nint f(void) { return g + N; }\nint h(void) { return f(); }\n",
            ),
        ];
        let built = build_fresh(&parsed);
        let cs = &built.changeset;
        assert!(cs.check_pairs().is_ok());

        let f = Fingerprint::new(EntityKind::Function, "src/a.c", "f");
        let h = Fingerprint::new(EntityKind::Function, "src/a.c", "h");
        let g = Fingerprint::new(EntityKind::Variable, "src/a.c", "g");
        let n = Fingerprint::new(EntityKind::Macro, "src/a.c", "N");
        let file = Fingerprint::file("src/a.c");
        assert!(has_edge(cs, &h, EdgeKind::Calls, &f));
        assert!(has_edge(cs, &f, EdgeKind::CalledBy, &h));
        assert!(has_edge(cs, &f, EdgeKind::Uses, &g));
        assert!(has_edge(cs, &g, EdgeKind::UsedBy, &f));
        assert!(has_edge(cs, &file, EdgeKind::UsesMacro, &n));
        assert!(has_edge(cs, &file, EdgeKind::Contains, &h));
        assert!(has_edge(cs, &h, EdgeKind::ContainedIn, &file));
        assert_eq!(built.unresolved_calls, 0);
        assert_eq!(built.embed_texts.len(), 2);
    }

    #[test]
    fn unresolved_calls_are_counted_not_emitted() {
        let parsed = vec![parse_c("src/a.c", "void f(void) { missing(); }\n")];
        let built = build_fresh(&parsed);
        assert_eq!(built.unresolved_calls, 1);
        assert!(built.changeset.upsert_edges.iter().all(|e| e.kind != EdgeKind::Calls));
    }

    #[test]
    fn same_file_candidate_wins() {
        let parsed = vec![
            parse_c("src/a.c", "static int dup(void) { return 1; }\nint f(void) { return dup(); }\n"),
            parse_c("src/b.c", "static int dup(void) { return 2; }\nint g(void) { return dup(); }\n"),
        ];
        let built = build_fresh(&parsed);
        let cs = &built.changeset;
        let g = Fingerprint::new(EntityKind::Function, "src/b.c", "g");
        let dup_b = Fingerprint::new(EntityKind::Function, "src/b.c", "dup");
        let dup_a = Fingerprint::new(EntityKind::Function, "src/a.c", "dup");
        assert!(has_edge(cs, &g, EdgeKind::Calls, &dup_b));
        assert!(!has_edge(cs, &g, EdgeKind::Calls, &dup_a));
    }

    #[test]
    fn external_symbols_resolve_cross_file_calls() {
        let parsed = vec![parse_c("src/b.c", "int g(void) { return f(); }\n")];
        let classification = classify(&parsed, &HashCache::new("/ws"));
        let mut external = ExternalSymbols::new();
        let f = sett_core::GraphNode {
            fingerprint: Fingerprint::new(EntityKind::Function, "src/a.c", "f"),
            kind: EntityKind::Function,
            name: "f".into(),
            qualified_name: "f".into(),
            file_path: "src/a.c".into(),
            line_start: 1,
            line_end: 1,
            language: Some(sett_core::Language::C),
            content_hash: sett_core::content_hash(EntityKind::Function, "int f(void) { return 0; }"),
            metadata: Default::default(),
            embedding: None,
        };
        external.extend([f.clone()]);
        let built = build(BuildInput {
            sequence: 2,
            purge_all: false,
            parsed: &parsed,
            classification: &classification,
            external: &external,
            existing_owned: &[],
            removed_incident: &[],
        });
        let g = Fingerprint::new(EntityKind::Function, "src/b.c", "g");
        assert!(has_edge(&built.changeset, &g, EdgeKind::Calls, &f.fingerprint));
        assert!(has_edge(&built.changeset, &f.fingerprint, EdgeKind::CalledBy, &g));
    }

    #[test]
    fn struct_access_falls_back_through_typedef() {
        let parsed = vec![parse_c(
            "src/p.c",
            "struct pt { int x; };\ntypedef struct pt pt_t;\nint get(pt_t *p) { return p->x; }\n",
        )];
        let built = build_fresh(&parsed);
        let access = Fingerprint::new(EntityKind::StructFieldAccess, "src/p.c", "get:pt_t.x#1");
        let class = Fingerprint::new(EntityKind::Class, "src/p.c", "pt");
        assert!(has_edge(&built.changeset, &access, EdgeKind::AccessesStruct, &class));
        assert!(has_edge(&built.changeset, &class, EdgeKind::AccessedBy, &access));
    }

    #[test]
    fn python_inheritance_and_method_calls() {
        let parsed = vec![PythonParser::new()
            .parse(
                "class Base:\n    def ping(self):\n        return 1\n\nclass Child(Base):\n    def run(self):\n        return self.ping()\n",
                "app/models.py",
            )
            .unwrap()];
        let built = build_fresh(&parsed);
        let cs = &built.changeset;
        let child = Fingerprint::new(EntityKind::Class, "app/models.py", "Child");
        let base = Fingerprint::new(EntityKind::Class, "app/models.py", "Base");
        let run = Fingerprint::new(EntityKind::Function, "app/models.py", "Child.run");
        let ping = Fingerprint::new(EntityKind::Function, "app/models.py", "Base.ping");
        assert!(has_edge(cs, &child, EdgeKind::Inherits, &base));
        assert!(has_edge(cs, &base, EdgeKind::InheritedBy, &child));
        assert!(has_edge(cs, &run, EdgeKind::Calls, &ping));
    }

    #[test]
    fn rebuilding_unchanged_input_is_empty() {
        let parsed = vec![parse_c("src/a.c", "int f(void) { return 0; }\nint g(void) { return f(); }\n")];
        let first = build_fresh(&parsed);

        let mut cache = HashCache::new("/ws");
        let fresh = parsed.iter().flat_map(|f| f.hashes()).collect();
        let classification = classify(&parsed, &cache);
        cache.commit(&classification, &fresh);

        let existing: Vec<GraphEdge> = first
            .changeset
            .upsert_edges
            .iter()
            .filter(|e| e.kind.is_forward())
            .cloned()
            .collect();
        let again = classify(&parsed, &cache);
        let second = build(BuildInput {
            sequence: 2,
            purge_all: false,
            parsed: &parsed,
            classification: &again,
            external: &ExternalSymbols::new(),
            existing_owned: &existing,
            removed_incident: &[],
        });
        assert!(second.changeset.is_empty());
    }

    #[test]
    fn removed_nodes_cascade_their_edges() {
        let before = vec![parse_c("src/a.c", "int f(void) { return 0; }\nint g(void) { return f(); }\n")];
        let first = build_fresh(&before);
        let mut cache = HashCache::new("/ws");
        let fresh = before.iter().flat_map(|f| f.hashes()).collect();
        cache.commit(&classify(&before, &cache), &fresh);

        let after = vec![parse_c("src/a.c", "int g(void) { return 0; }\n")];
        let classification = classify(&after, &cache);
        let f = Fingerprint::new(EntityKind::Function, "src/a.c", "f");
        assert!(classification.removed.contains(&f));

        let existing: Vec<GraphEdge> = first
            .changeset
            .upsert_edges
            .iter()
            .filter(|e| e.kind.is_forward())
            .cloned()
            .collect();
        let incident: Vec<GraphEdge> = first
            .changeset
            .upsert_edges
            .iter()
            .filter(|e| e.source == f || e.target == f)
            .cloned()
            .collect();
        let built = build(BuildInput {
            sequence: 2,
            purge_all: false,
            parsed: &after,
            classification: &classification,
            external: &ExternalSymbols::new(),
            existing_owned: &existing,
            removed_incident: &incident,
        });
        let cs = &built.changeset;
        assert_eq!(cs.delete_nodes, vec![f.clone()]);
        assert!(cs.check_pairs().is_ok());
        let g = Fingerprint::new(EntityKind::Function, "src/a.c", "g");
        assert!(cs.delete_edges.contains(&EdgeKey {
            source: g.clone(),
            kind: EdgeKind::Calls,
            target: f.clone(),
        }));
        assert!(cs.delete_edges.contains(&EdgeKey {
            source: f.clone(),
            kind: EdgeKind::CalledBy,
            target: g,
        }));
        // g changed, f's Contains pair is deleted once
        let contains = cs
            .delete_edges
            .iter()
            .filter(|k| k.kind == EdgeKind::Contains && k.target == f)
            .count();
        assert_eq!(contains, 1);
    }
}
