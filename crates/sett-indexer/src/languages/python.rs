//! Python language parser using tree-sitter

use std::collections::{BTreeMap, HashSet};

use sett_core::{EntityKind, Language};
use tree_sitter::Node;

use crate::error::ParseError;
use crate::extractor::{
    Capabilities, LanguageParser, ParsedFile, Sink, UsageKind, line, parse_tree, text,
};

pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        PythonParser
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn parse(&self, source: &str, path: &str) -> Result<ParsedFile, ParseError> {
        let tree = parse_tree(
            tree_sitter_python::LANGUAGE.into(),
            Language::Python,
            source,
            path,
        )?;
        let mut walker = Walker {
            source: source.as_bytes(),
            sink: Sink::new(path, Language::Python, source),
            scopes: Vec::new(),
            function: None,
            locals: HashSet::new(),
            assigned: HashSet::new(),
        };
        walker.visit(tree.root_node());
        Ok(walker.sink.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Class,
    Function,
}

struct Walker<'s> {
    source: &'s [u8],
    sink: Sink,
    /// Enclosing classes and functions, outermost first.
    scopes: Vec<(ScopeKind, String)>,
    function: Option<String>,
    /// Parameters and assigned names of the enclosing function.
    locals: HashSet<String>,
    /// `(scope, name)` pairs that already have a Variable entity.
    assigned: HashSet<(Option<String>, String)>,
}

impl<'s> Walker<'s> {
    fn text(&self, node: Node) -> &'s str {
        text(node, self.source)
    }

    fn qualify(&self, name: &str) -> String {
        let mut parts: Vec<&str> = self.scopes.iter().map(|(_, n)| n.as_str()).collect();
        parts.push(name);
        parts.join(".")
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
            "class_definition" => self.class_definition(node),
            "import_statement" => self.import(node),
            "import_from_statement" => self.import_from(node),
            "assignment" => self.assignment(node),
            "call" => {
                self.call(node);
                self.visit_children(node);
            }
            // `a.b`: only `a` is a name lookup
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.visit(object);
                }
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.visit(value);
                }
            }
            "identifier" => {
                if let Some(scope) = self.function.clone() {
                    let name = self.text(node).to_string();
                    self.sink
                        .usage(UsageKind::Identifier, &name, Some(&scope), line(node));
                }
            }
            _ => self.visit_children(node),
        }
    }

    fn function_definition(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified = self.qualify(&name);

        let mut metadata = BTreeMap::new();
        let params = node.child_by_field_name("parameters");
        let params_text = params.map(|p| self.text(p)).unwrap_or("()");
        metadata.insert("parameters".to_string(), params_text.to_string());
        let mut signature = format!("def {}{}", name, params_text);
        if let Some(ret) = node.child_by_field_name("return_type") {
            let ret = self.text(ret);
            metadata.insert("return_type".to_string(), ret.to_string());
            signature.push_str(" -> ");
            signature.push_str(ret);
        }
        metadata.insert("signature".to_string(), signature);
        if matches!(self.scopes.last(), Some((ScopeKind::Class, _))) {
            metadata.insert("method".to_string(), "true".to_string());
        }
        if node.parent().is_some_and(|p| p.kind() == "decorated_definition") {
            metadata.insert("decorated".to_string(), "true".to_string());
        }

        let qualified = self
            .sink
            .entity(EntityKind::Function, &name, &qualified, node, self.source, metadata);

        let mut locals = HashSet::new();
        if let Some(params) = params {
            self.parameter_names(params, &mut locals);
        }

        let outer_fn = self.function.replace(qualified);
        let outer_locals = std::mem::replace(&mut self.locals, locals);
        self.scopes.push((ScopeKind::Function, name));
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
        self.function = outer_fn;
        self.locals = outer_locals;
    }

    fn parameter_names(&self, params: Node, out: &mut HashSet<String>) {
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            let name = match param.kind() {
                "identifier" => Some(param),
                "default_parameter" | "typed_default_parameter" => {
                    param.child_by_field_name("name")
                }
                "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    let mut inner = param.walk();
                    let found = param
                        .named_children(&mut inner)
                        .find(|c| c.kind() == "identifier");
                    found
                }
                _ => None,
            };
            if let Some(n) = name {
                out.insert(self.text(n).to_string());
            }
        }
    }

    fn class_definition(&mut self, node: Node) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node).to_string();
        let qualified = self.qualify(&name);

        let mut bases = Vec::new();
        if let Some(supers) = node.child_by_field_name("superclasses") {
            let mut cursor = supers.walk();
            for base in supers.named_children(&mut cursor) {
                if matches!(base.kind(), "identifier" | "attribute") {
                    bases.push((self.text(base).to_string(), line(base)));
                }
            }
        }
        let mut metadata = BTreeMap::new();
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

        // Class bodies run outside any function
        let outer_fn = self.function.take();
        let outer_locals = std::mem::take(&mut self.locals);
        self.scopes.push((ScopeKind::Class, name));
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
        self.function = outer_fn;
        self.locals = outer_locals;
    }

    fn import(&mut self, node: Node) {
        let mut modules = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let target = match child.kind() {
                "dotted_name" => Some(child),
                "aliased_import" => child.child_by_field_name("name"),
                _ => None,
            };
            if let Some(t) = target {
                modules.push(self.text(t).to_string());
            }
        }
        for module in modules {
            self.sink
                .entity(EntityKind::Import, &module, &module, node, self.source, BTreeMap::new());
        }
    }

    fn import_from(&mut self, node: Node) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = self.text(module_node).to_string();

        let mut items = Vec::new();
        let mut cursor = node.walk();
        for item in node.children_by_field_name("name", &mut cursor) {
            let name = match item.kind() {
                "aliased_import" => item.child_by_field_name("name"),
                _ => Some(item),
            };
            if let Some(n) = name {
                items.push(self.text(n).to_string());
            }
        }
        let mut metadata = BTreeMap::new();
        if !items.is_empty() {
            metadata.insert("items".to_string(), items.join(","));
        }
        if module.starts_with('.') {
            metadata.insert("relative".to_string(), "true".to_string());
        }
        self.sink
            .entity(EntityKind::Import, &module, &module, node, self.source, metadata);
    }

    fn assignment(&mut self, node: Node) {
        let in_class = matches!(self.scopes.last(), Some((ScopeKind::Class, _)));
        if let Some(left) = node.child_by_field_name("left") {
            if !in_class {
                let mut targets = Vec::new();
                collect_targets(left, self.source, &mut targets);
                for name in targets {
                    self.variable(node, name);
                }
            }
        }
        if let Some(right) = node.child_by_field_name("right") {
            self.visit(right);
        }
    }

    fn variable(&mut self, node: Node, name: String) {
        let scope = self.function.clone();
        if !self.assigned.insert((scope.clone(), name.clone())) {
            return;
        }
        let mut metadata = BTreeMap::new();
        let qualified = match &scope {
            Some(func) => {
                metadata.insert("scope".to_string(), func.clone());
                self.locals.insert(name.clone());
                format!("{}.{}", func, name)
            }
            None => name.clone(),
        };
        if let Some(ty) = node.child_by_field_name("type") {
            metadata.insert("type".to_string(), self.text(ty).to_string());
        }
        self.sink
            .entity(EntityKind::Variable, &name, &qualified, node, self.source, metadata);
    }

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
            "attribute" => self.text(callee).split_whitespace().collect(),
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
}

/// Plain names bound by an assignment target.
fn collect_targets(node: Node, source: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "identifier" => out.push(text(node, source).to_string()),
        "pattern_list" | "tuple_pattern" | "list_pattern" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_targets(child, source, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParsedFile {
        PythonParser::new().parse(src, "pkg/app.py").unwrap()
    }

    fn names(file: &ParsedFile, kind: EntityKind) -> Vec<String> {
        file.entities_of(kind).map(|e| e.qualified_name.clone()).collect()
    }

    #[test]
    fn extracts_definitions_and_imports() {
        let file = parse(
            r#"import os
import numpy as np
from .models import User, Group as G

LIMIT = 10

class Base:
    kind = "base"

class Service(Base):
    def run(self, job) -> int:
        count = 0
        return helper(job)

def helper(job):
    def inner():
        return 1
    return inner()
"#,
        );
        assert_eq!(names(&file, EntityKind::Import), vec!["os", "numpy", ".models"]);
        assert_eq!(names(&file, EntityKind::Class), vec!["Base", "Service"]);
        assert_eq!(
            names(&file, EntityKind::Function),
            vec!["Service.run", "helper", "helper.inner"]
        );
        assert_eq!(names(&file, EntityKind::Variable), vec!["LIMIT", "Service.run.count"]);

        let from = file.entities_of(EntityKind::Import).nth(2).unwrap();
        assert_eq!(from.metadata["items"], "User,Group");
        assert_eq!(from.metadata["relative"], "true");

        let run = file.entities_of(EntityKind::Function).next().unwrap();
        assert_eq!(run.metadata["signature"], "def run(self, job) -> int");
        assert_eq!(run.metadata["method"], "true");

        assert_eq!(file.bases.len(), 1);
        assert_eq!(file.bases[0].class, "Service");
        assert_eq!(file.bases[0].base, "Base");
    }

    #[test]
    fn calls_name_the_enclosing_function() {
        let file = parse(
            r#"setup()

def main(callback):
    run_all()
    self_check = lambda: 0
    callback()
    os.path.join("a", "b")
"#,
        );
        let calls: Vec<(&str, &str)> = file
            .calls
            .iter()
            .map(|c| (c.caller.as_str(), c.callee.as_str()))
            .collect();
        assert_eq!(calls, vec![("main", "run_all"), ("main", "os.path.join")]);
        // module-level call and call through a parameter
        assert_eq!(file.dropped.len(), 2);
    }

    #[test]
    fn records_identifier_usages_inside_functions() {
        let file = parse(
            r#"RETRIES = 3

def fetch():
    return RETRIES + RETRIES
"#,
        );
        let usages: Vec<&str> = file.usages.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(usages, vec!["RETRIES"]);
        assert_eq!(file.usages[0].scope.as_deref(), Some("fetch"));
    }

    #[test]
    fn no_optional_capabilities() {
        assert_eq!(PythonParser::new().capabilities(), Capabilities::default());
    }
}
