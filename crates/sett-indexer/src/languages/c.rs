//! C and C++ parser using tree-sitter
//!
//! Extracts functions, structs/unions/enums/classes, global and local
//! variables, `#include`s, macros, typedefs and struct field accesses. Calls
//! through function pointers, struct members (in C) or local variables are
//! dropped rather than guessed.

use std::collections::{BTreeMap, HashMap, HashSet};

use sett_core::{EntityKind, Language};
use tree_sitter::Node;

use crate::error::ParseError;
use crate::extractor::{
    Capabilities, LanguageParser, ParsedFile, Sink, UsageKind, line, parse_tree, text,
};

/// Parser for one member of the C family.
pub struct CFamilyParser {
    language: Language,
}

impl CFamilyParser {
    pub fn c() -> Self {
        CFamilyParser {
            language: Language::C,
        }
    }

    pub fn cpp() -> Self {
        CFamilyParser {
            language: Language::Cpp,
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self.language {
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            _ => tree_sitter_c::LANGUAGE.into(),
        }
    }
}

impl LanguageParser for CFamilyParser {
    fn language(&self) -> Language {
        self.language
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            macros: true,
            typedefs: true,
            field_accesses: true,
        }
    }

    fn parse(&self, source: &str, path: &str) -> Result<ParsedFile, ParseError> {
        let tree = parse_tree(self.grammar(), self.language, source, path)?;
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut walker = Walker {
            source: bytes,
            cpp: self.language == Language::Cpp,
            sink: Sink::new(path, self.language, source),
            containers: Vec::new(),
            function: None,
            this_class: None,
            locals: HashSet::new(),
            var_types: HashMap::new(),
        };
        walker.collect_var_types(root);
        walker.visit(root);
        Ok(walker.sink.finish())
    }
}

const DECLARATOR_WRAPPERS: &[&str] = &[
    "pointer_declarator",
    "array_declarator",
    "parenthesized_declarator",
    "reference_declarator",
    "init_declarator",
    "attributed_declarator",
];

struct Walker<'s> {
    source: &'s [u8],
    cpp: bool,
    sink: Sink,
    /// Enclosing namespaces and classes (C++ only).
    containers: Vec<String>,
    /// Qualified name of the enclosing function.
    function: Option<String>,
    /// Class that `this` refers to in the enclosing method.
    this_class: Option<String>,
    /// Parameters and locals of the enclosing function.
    locals: HashSet<String>,
    /// Variable name → declared struct/class type, file-wide.
    var_types: HashMap<String, String>,
}

impl<'s> Walker<'s> {
    fn text(&self, node: Node) -> &'s str {
        text(node, self.source)
    }

    fn qualify(&self, name: &str) -> String {
        if self.containers.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", self.containers.join("::"), name)
        }
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: Node) {
        match node.kind() {
            "function_definition" => self.function_definition(node),
            "struct_specifier" | "union_specifier" | "enum_specifier" | "class_specifier" => {
                self.class_specifier(node, None)
            }
            "type_definition" => self.type_definition(node),
            "declaration" => self.declaration(node),
            "preproc_include" => self.include(node),
            "preproc_def" | "preproc_function_def" => self.macro_definition(node),
            "namespace_definition" => self.namespace(node),
            "call_expression" => {
                self.call(node);
                self.visit_children(node);
            }
            "field_expression" => {
                self.field_access(node);
                self.visit_children(node);
            }
            "identifier" => self.identifier(node),
            "type_identifier" => self.type_identifier(node),
            _ => self.visit_children(node),
        }
    }

    // ── Definitions ─────────────────────────────────────────

    fn function_definition(&mut self, node: Node) {
        let Some(declarator) = node
            .child_by_field_name("declarator")
            .and_then(find_function_declarator)
        else {
            self.visit_children(node);
            return;
        };
        let Some(name_node) = declarator.child_by_field_name("declarator") else {
            self.visit_children(node);
            return;
        };
        let raw = squash(self.text(name_node));
        let name = raw.rsplit("::").next().unwrap_or(&raw).to_string();
        let qualified = self.qualify(&raw);

        let mut metadata = BTreeMap::new();
        if let Some(ret) = node.child_by_field_name("type") {
            metadata.insert("return_type".to_string(), squash(self.text(ret)));
        }
        let params = declarator.child_by_field_name("parameters");
        if let Some(params) = params {
            metadata.insert("parameters".to_string(), squash(self.text(params)));
        }
        let body = node.child_by_field_name("body");
        let sig_end = body.map_or(node.end_byte(), |b| b.start_byte());
        let signature = std::str::from_utf8(&self.source[node.start_byte()..sig_end]).unwrap_or("");
        metadata.insert("signature".to_string(), squash(signature));

        let qualified = self
            .sink
            .entity(EntityKind::Function, &name, &qualified, node, self.source, metadata);

        let mut locals = HashSet::new();
        if let Some(params) = params {
            collect_parameter_names(params, self.source, &mut locals);
        }
        let owner = match raw.rsplit_once("::") {
            Some((prefix, _)) => prefix.rsplit("::").next().map(str::to_string),
            None if self.cpp => self.containers.last().cloned(),
            None => None,
        };
        let outer_this = std::mem::replace(&mut self.this_class, owner);
        let outer_fn = self.function.replace(qualified);
        let outer_locals = std::mem::replace(&mut self.locals, locals);
        if let Some(body) = body {
            self.visit(body);
        }
        self.function = outer_fn;
        self.locals = outer_locals;
        self.this_class = outer_this;
    }

    fn class_specifier(&mut self, node: Node, alias: Option<&str>) {
        let Some(body) = node.child_by_field_name("body") else {
            // Forward declaration or type reference
            self.visit_children(node);
            return;
        };
        let tag = node.child_by_field_name("name").map(|n| squash(self.text(n)));
        let Some(name) = tag.or_else(|| alias.map(str::to_string)) else {
            self.visit(body);
            return;
        };
        let qualified = self.qualify(&name);
        let mut metadata = BTreeMap::new();
        let flavor = node.kind().trim_end_matches("_specifier");
        metadata.insert("flavor".to_string(), flavor.to_string());

        let mut bases = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "base_class_clause" {
                let mut inner = child.walk();
                for base in child.named_children(&mut inner) {
                    match base.kind() {
                        "type_identifier" | "qualified_identifier" => {
                            bases.push((squash(self.text(base)), line(base)))
                        }
                        "template_type" => {
                            if let Some(n) = base.child_by_field_name("name") {
                                bases.push((squash(self.text(n)), line(base)));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
        if !bases.is_empty() {
            let names: Vec<&str> = bases.iter().map(|(b, _)| b.as_str()).collect();
            metadata.insert("bases".to_string(), names.join(","));
        }

        let qualified = self
            .sink
            .entity(EntityKind::Class, &name, &qualified, node, self.source, metadata);
        for (base, at) in bases {
            self.sink.base(&qualified, &base, at);
        }

        if self.cpp {
            self.containers.push(name);
            self.visit(body);
            self.containers.pop();
        } else {
            self.visit(body);
        }
    }

    fn type_definition(&mut self, node: Node) {
        let ty = node.child_by_field_name("type");
        let mut names = Vec::new();
        let mut cursor = node.walk();
        for decl in node.children_by_field_name("declarator", &mut cursor) {
            let kinds = ["type_identifier", "primitive_type"];
            let name = innermost_name(decl, &kinds).or_else(|| {
                find_function_declarator(decl)
                    .and_then(|f| f.child_by_field_name("declarator"))
                    .and_then(|d| innermost_name(d, &kinds))
            });
            if let Some(n) = name {
                names.push(squash(self.text(n)));
            }
        }
        let Some(first) = names.first().cloned() else {
            self.visit_children(node);
            return;
        };

        let mut underlying = ty.map(|t| squash(self.text(t))).unwrap_or_default();
        if let Some(ty) = ty {
            if is_record_specifier(ty) {
                if ty.child_by_field_name("body").is_some() {
                    let tag = ty.child_by_field_name("name").map(|n| squash(self.text(n)));
                    let keyword = ty.kind().trim_end_matches("_specifier");
                    underlying = format!("{} {}", keyword, tag.as_deref().unwrap_or(&first));
                    self.class_specifier(ty, Some(&first));
                }
            } else {
                self.visit(ty);
            }
        }

        for name in names {
            let mut metadata = BTreeMap::new();
            metadata.insert("underlying_type".to_string(), underlying.clone());
            let qualified = self.qualify(&name);
            self.sink
                .entity(EntityKind::Typedef, &name, &qualified, node, self.source, metadata);
        }
    }

    fn declaration(&mut self, node: Node) {
        let storage = {
            let mut cursor = node.walk();
            node.children(&mut cursor)
                .find(|c| c.kind() == "storage_class_specifier")
                .map(|c| self.text(c).to_string())
        };
        let ty = node.child_by_field_name("type").map(|t| squash(self.text(t)));

        let mut declared = Vec::new();
        let mut cursor = node.walk();
        for decl in node.children_by_field_name("declarator", &mut cursor) {
            if let Some(n) = variable_name(decl) {
                declared.push(self.text(n).to_string());
            }
        }

        for name in declared {
            let mut metadata = BTreeMap::new();
            if let Some(ty) = &ty {
                metadata.insert("type".to_string(), ty.clone());
            }
            if let Some(storage) = &storage {
                metadata.insert("storage_class".to_string(), storage.clone());
            }
            let qualified = match &self.function {
                Some(func) => {
                    metadata.insert("scope".to_string(), func.clone());
                    self.locals.insert(name.clone());
                    format!("{}.{}", func, name)
                }
                None => self.qualify(&name),
            };
            self.sink
                .entity(EntityKind::Variable, &name, &qualified, node, self.source, metadata);
        }

        self.visit_children(node);
    }

    fn include(&mut self, node: Node) {
        let Some(path) = node.child_by_field_name("path") else {
            return;
        };
        let raw = self.text(path);
        let module = raw.trim_matches(|c| c == '"' || c == '<' || c == '>').to_string();
        if module.is_empty() {
            return;
        }
        let mut metadata = BTreeMap::new();
        let system = path.kind() == "system_lib_string";
        metadata.insert("system".to_string(), system.to_string());
        self.sink
            .entity(EntityKind::Import, &module, &module, node, self.source, metadata);
    }

    fn macro_definition(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let mut metadata = BTreeMap::new();
        if let Some(value) = node.child_by_field_name("value") {
            metadata.insert("value".to_string(), self.text(value).trim().to_string());
        }
        if let Some(params) = node.child_by_field_name("parameters") {
            metadata.insert("parameters".to_string(), squash(self.text(params)));
        }
        self.sink
            .entity(EntityKind::Macro, &name, &name, node, self.source, metadata);
    }

    fn namespace(&mut self, node: Node) {
        let name = node.child_by_field_name("name").map(|n| squash(self.text(n)));
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        match name {
            Some(name) => {
                self.containers.push(name);
                self.visit(body);
                self.containers.pop();
            }
            None => self.visit(body),
        }
    }

    // ── Facts ───────────────────────────────────────────────

    fn call(&mut self, node: Node) {
        let Some(callee) = node.child_by_field_name("function") else {
            return;
        };
        let at = line(node);
        let name = match callee.kind() {
            "identifier" => {
                let name = self.text(callee);
                if self.locals.contains(name) {
                    self.sink
                        .drop_fact(format!("{}:{}: indirect call through {}", self.sink.path(), at, name));
                    return;
                }
                name.to_string()
            }
            "qualified_identifier" if self.cpp => squash(self.text(callee)),
            "template_function" if self.cpp => match callee.child_by_field_name("name") {
                Some(n) => squash(self.text(n)),
                None => return,
            },
            "field_expression" if self.cpp => squash(self.text(callee)),
            other => {
                self.sink
                    .drop_fact(format!("{}:{}: indirect call via {}", self.sink.path(), at, other));
                return;
            }
        };
        match self.function.clone() {
            Some(caller) => self.sink.call(&caller, &name, at),
            None => self
                .sink
                .drop_fact(format!("{}:{}: call to {} outside a function", self.sink.path(), at, name)),
        }
    }

    fn field_access(&mut self, node: Node) {
        if self.cpp && is_call_target(node) {
            // Method call, not a field read
            return;
        }
        let (Some(argument), Some(field)) = (
            node.child_by_field_name("argument"),
            node.child_by_field_name("field"),
        ) else {
            return;
        };
        let Some(struct_name) = self.struct_of(argument) else {
            return;
        };
        let access = {
            let mut cursor = node.walk();
            let arrow = node.children(&mut cursor).any(|c| c.kind() == "->");
            if arrow { "pointer" } else { "direct" }
        };
        let field = self.text(field).to_string();
        let scope = self.function.clone();
        self.sink
            .field_access(scope.as_deref(), &struct_name, &field, access, node, self.source);
    }

    /// Best-effort struct type of the expression left of `.` / `->`.
    fn struct_of(&self, expr: Node) -> Option<String> {
        match expr.kind() {
            "identifier" => {
                let name = self.text(expr);
                Some(self.var_types.get(name).cloned().unwrap_or_else(|| name.to_string()))
            }
            "this" => self.this_class.clone(),
            "pointer_expression" | "subscript_expression" => expr
                .child_by_field_name("argument")
                .and_then(|a| self.struct_of(a)),
            "cast_expression" => expr
                .child_by_field_name("type")
                .and_then(|t| self.type_name(t)),
            "parenthesized_expression" => expr.named_child(0).and_then(|c| self.struct_of(c)),
            _ => None,
        }
    }

    fn type_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "type_identifier" => Some(self.text(node).to_string()),
            k if is_record_kind(k) => node
                .child_by_field_name("name")
                .map(|n| self.text(n).to_string()),
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                children.into_iter().find_map(|c| self.type_name(c))
            }
        }
    }

    fn identifier(&mut self, node: Node) {
        if is_declared_name(node) {
            return;
        }
        let name = self.text(node).to_string();
        let scope = self.function.clone();
        self.sink
            .usage(UsageKind::Identifier, &name, scope.as_deref(), line(node));
    }

    fn type_identifier(&mut self, node: Node) {
        if is_declared_name(node) {
            return;
        }
        if let Some(parent) = node.parent() {
            if is_record_specifier(parent) || parent.kind() == "class_specifier" {
                // struct tag, not a typedef name
                return;
            }
        }
        let name = self.text(node).to_string();
        let scope = self.function.clone();
        self.sink.usage(UsageKind::Type, &name, scope.as_deref(), line(node));
    }

    /// File-wide variable → struct type map used to name field accesses.
    fn collect_var_types(&mut self, node: Node) {
        if matches!(node.kind(), "declaration" | "parameter_declaration") {
            if let Some(ty) = node.child_by_field_name("type").and_then(|t| self.type_name(t)) {
                let mut cursor = node.walk();
                for decl in node.children_by_field_name("declarator", &mut cursor) {
                    if let Some(n) = innermost_name(decl, &["identifier"]) {
                        self.var_types.insert(self.text(n).to_string(), ty.clone());
                    }
                }
            }
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.collect_var_types(child);
        }
    }
}

/// Collapse runs of whitespace so multi-line declarators read as one line.
fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_record_kind(kind: &str) -> bool {
    matches!(
        kind,
        "struct_specifier" | "union_specifier" | "enum_specifier" | "class_specifier"
    )
}

fn is_record_specifier(node: Node) -> bool {
    is_record_kind(node.kind())
}

/// Walk a declarator chain down to its `function_declarator`, if any.
fn find_function_declarator(node: Node) -> Option<Node> {
    let mut current = node;
    loop {
        if current.kind() == "function_declarator" {
            return Some(current);
        }
        if !DECLARATOR_WRAPPERS.contains(&current.kind()) {
            return None;
        }
        current = current
            .child_by_field_name("declarator")
            .or_else(|| current.named_child(0))?;
    }
}

/// Walk a declarator chain down to the declared name.
fn innermost_name<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node;
    loop {
        if kinds.contains(&current.kind()) {
            return Some(current);
        }
        if !DECLARATOR_WRAPPERS.contains(&current.kind()) {
            return None;
        }
        current = current
            .child_by_field_name("declarator")
            .or_else(|| current.named_child(0))?;
    }
}

fn collect_parameter_names(params: Node, source: &[u8], out: &mut HashSet<String>) {
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        if param.kind() != "parameter_declaration" {
            continue;
        }
        let Some(decl) = param.child_by_field_name("declarator") else {
            continue;
        };
        let name = innermost_name(decl, &["identifier"]).or_else(|| {
            // `void (*cb)(int)` parameters
            find_function_declarator(decl)
                .and_then(|f| f.child_by_field_name("declarator"))
                .and_then(|d| innermost_name(d, &["identifier"]))
        });
        if let Some(n) = name {
            out.insert(text(n, source).to_string());
        }
    }
}

/// The node is the name being declared by its parent, not a use.
fn is_declared_name(node: Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    if matches!(
        parent.kind(),
        "preproc_def" | "preproc_function_def" | "preproc_params"
    ) {
        return true;
    }
    let mut cursor = parent.walk();
    let declared = parent
        .children_by_field_name("declarator", &mut cursor)
        .any(|c| c.id() == node.id());
    declared
}

/// Name declared by a variable declarator; `None` for prototypes.
fn variable_name(decl: Node) -> Option<Node> {
    if let Some(func) = find_function_declarator(decl) {
        // `int (*fp)(int)` declares a variable, `int f(int)` does not
        let inner = func.child_by_field_name("declarator")?;
        if inner.kind() != "parenthesized_declarator" {
            return None;
        }
        return innermost_name(inner, &["identifier"]);
    }
    innermost_name(decl, &["identifier", "field_identifier"])
}

fn is_call_target(node: Node) -> bool {
    node.parent().is_some_and(|p| {
        p.kind() == "call_expression"
            && p.child_by_field_name("function").is_some_and(|f| f.id() == node.id())
    })
}
