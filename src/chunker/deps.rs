//! Per-file dependency analysis over the parsed syntax tree.
//!
//! Consumes a parse once per file and extracts imports (classified
//! standard / external / internal), call sites, and type references. The
//! AST chunker reuses the same extraction to attach per-declaration
//! dependency arrays; the snapshot-wide graph is assembled later in
//! [`crate::graph`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

/// Go's predeclared functions. Calls to these are tagged builtin and kept
/// out of the internal/external partitions.
const BUILTIN_FUNCS: [&str; 18] = [
    "append", "cap", "clear", "close", "complex", "copy", "delete", "imag", "len", "make", "max",
    "min", "new", "panic", "print", "println", "real", "recover",
];

/// Predeclared types suppressed from type-dependency lists.
const PRIMITIVE_TYPES: [&str; 21] = [
    "bool", "string", "int", "int8", "int16", "int32", "int64", "uint", "uint8", "uint16",
    "uint32", "uint64", "uintptr", "byte", "rune", "float32", "float64", "complex64", "complex128",
    "error", "any",
];

pub fn is_builtin_func(name: &str) -> bool {
    BUILTIN_FUNCS.contains(&name)
}

pub fn is_primitive_type(name: &str) -> bool {
    PRIMITIVE_TYPES.contains(&name)
}

/// Classification of an import path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportClass {
    Standard,
    External,
    Internal,
}

/// One import of a file, with usage accounting.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    pub path: String,
    pub alias: Option<String>,
    pub class: ImportClass,
    /// Version from the module manifest, when the caller supplied one.
    pub version: Option<String>,
    pub usage_count: usize,
    /// Top-level declarations that reference this import.
    pub referenced_by: Vec<String>,
}

impl ImportInfo {
    /// Identifier the import is referenced by in code: explicit alias or
    /// the last path segment.
    pub fn local_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.path.rsplit('/').next().unwrap_or(&self.path),
        }
    }
}

/// Kind of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Internal,
    External,
    Method,
    Builtin,
}

/// One call site.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub callee: String,
    /// Package qualifier for external calls.
    pub package: Option<String>,
    pub kind: CallKind,
    /// Receiver expression type for method calls, when syntactically known.
    pub receiver_type: Option<String>,
    /// Argument type names recoverable from the syntax (composite literals).
    pub arg_types: Vec<String>,
}

/// A referenced named type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub name: String,
    pub package: Option<String>,
}

/// Full analysis of one file.
#[derive(Debug, Clone, Default)]
pub struct FileAnalysis {
    pub imports: Vec<ImportInfo>,
    pub calls: Vec<CallInfo>,
    pub type_refs: Vec<TypeRef>,
}

/// Module manifest supplied by the caller; maps dependency paths to the
/// versions pinned in `go.mod`.
#[derive(Debug, Clone, Default)]
pub struct ModuleManifest {
    pub module_path: Option<String>,
    pub versions: BTreeMap<String, String>,
}

/// Parse a `go.mod` file into a [`ModuleManifest`]. Tolerant of anything
/// it does not recognize; only `module`, `require` lines and blocks are
/// read.
pub fn parse_go_mod(content: &str) -> ModuleManifest {
    let mut manifest = ModuleManifest::default();
    let mut in_require = false;

    for raw in content.lines() {
        let line = raw.split("//").next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("module ") {
            manifest.module_path = Some(rest.trim().to_string());
            continue;
        }
        if line == "require (" {
            in_require = true;
            continue;
        }
        if in_require && line == ")" {
            in_require = false;
            continue;
        }
        let entry = if in_require {
            Some(line)
        } else {
            line.strip_prefix("require ")
        };
        if let Some(entry) = entry {
            let mut parts = entry.split_whitespace();
            if let (Some(path), Some(version)) = (parts.next(), parts.next()) {
                manifest
                    .versions
                    .insert(path.to_string(), version.to_string());
            }
        }
    }
    manifest
}

/// Pre-order walk of a subtree.
pub fn walk<'tree>(node: Node<'tree>, f: &mut impl FnMut(Node<'tree>)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, f);
    }
}

pub fn node_text<'s>(node: Node<'_>, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

/// Analyzer for one snapshot; holds the classification context.
#[derive(Debug, Clone, Default)]
pub struct DependencyAnalyzer {
    manifest: ModuleManifest,
}

impl DependencyAnalyzer {
    pub fn new(manifest: ModuleManifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    /// Classify an import path. No dot in the first segment means the
    /// standard library; the module's own prefix or an `/internal/` or
    /// `/pkg/` segment means internal; anything else is external.
    pub fn classify_import(&self, path: &str) -> ImportClass {
        let first = path.split('/').next().unwrap_or(path);
        if !first.contains('.') {
            return ImportClass::Standard;
        }
        if let Some(module) = &self.manifest.module_path {
            if path == module || path.starts_with(&format!("{module}/")) {
                return ImportClass::Internal;
            }
        }
        if path.contains("/internal/") || path.contains("/pkg/") {
            return ImportClass::Internal;
        }
        ImportClass::External
    }

    /// Analyze a parsed file: imports with usage accounting, call sites,
    /// and type references.
    pub fn analyze(&self, root: Node<'_>, src: &str) -> FileAnalysis {
        let mut imports = self.collect_imports(root, src);
        let alias_index: HashMap<String, usize> = imports
            .iter()
            .enumerate()
            .map(|(i, imp)| (imp.local_name().to_string(), i))
            .collect();
        let aliases: HashSet<String> = alias_index.keys().cloned().collect();

        let mut calls = Vec::new();
        let mut type_refs = Vec::new();

        let mut cursor = root.walk();
        for decl in root.children(&mut cursor) {
            let decl_name = declaration_name(decl, src);
            let mut used_here: HashSet<String> = HashSet::new();

            walk(decl, &mut |node| match node.kind() {
                "call_expression" => {
                    if let Some(call) = self.classify_call(node, src, &aliases) {
                        if let Some(pkg) = &call.package {
                            used_here.insert(pkg.clone());
                        }
                        calls.push(call);
                    }
                }
                "selector_expression" => {
                    if let Some(operand) = node.child_by_field_name("operand") {
                        let base = node_text(operand, src);
                        if aliases.contains(base) {
                            used_here.insert(base.to_string());
                        }
                    }
                }
                "type_identifier" => {
                    let name = node_text(node, src).to_string();
                    if !is_primitive_type(&name) {
                        let package = qualified_package(node, src, &aliases);
                        let type_ref = TypeRef { name, package };
                        if !type_refs.contains(&type_ref) {
                            type_refs.push(type_ref);
                        }
                    }
                }
                _ => {}
            });

            for alias in used_here {
                if let Some(&idx) = alias_index.get(&alias) {
                    imports[idx].usage_count += 1;
                    if let Some(name) = &decl_name {
                        if !imports[idx].referenced_by.contains(name) {
                            imports[idx].referenced_by.push(name.clone());
                        }
                    }
                }
            }
        }

        FileAnalysis {
            imports,
            calls,
            type_refs,
        }
    }

    /// Imports of a file with classification and manifest versions.
    pub fn collect_imports(&self, root: Node<'_>, src: &str) -> Vec<ImportInfo> {
        let mut out = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            if child.kind() != "import_declaration" {
                continue;
            }
            walk(child, &mut |node| {
                if node.kind() != "import_spec" {
                    return;
                }
                let path = node
                    .child_by_field_name("path")
                    .map(|p| node_text(p, src).trim_matches('"').to_string())
                    .unwrap_or_default();
                if path.is_empty() {
                    return;
                }
                let alias = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, src).to_string())
                    .filter(|a| a.as_str() != "_" && a.as_str() != ".");
                let class = self.classify_import(&path);
                let version = self.manifest.versions.get(&path).cloned().or_else(|| {
                    // Nested package of a required module.
                    self.manifest
                        .versions
                        .iter()
                        .find(|(dep, _)| path.starts_with(&format!("{dep}/")))
                        .map(|(_, v)| v.clone())
                });
                out.push(ImportInfo {
                    path,
                    alias,
                    class,
                    version,
                    usage_count: 0,
                    referenced_by: Vec::new(),
                });
            });
        }
        out
    }

    fn classify_call(
        &self,
        node: Node<'_>,
        src: &str,
        import_aliases: &HashSet<String>,
    ) -> Option<CallInfo> {
        let function = node.child_by_field_name("function")?;
        let arg_types = argument_types(node, src);

        match function.kind() {
            "identifier" => {
                let name = node_text(function, src).to_string();
                let kind = if is_builtin_func(&name) {
                    CallKind::Builtin
                } else {
                    CallKind::Internal
                };
                Some(CallInfo {
                    callee: name,
                    package: None,
                    kind,
                    receiver_type: None,
                    arg_types,
                })
            }
            "selector_expression" => {
                let operand = function.child_by_field_name("operand")?;
                let field = function.child_by_field_name("field")?;
                let base = node_text(operand, src).to_string();
                let callee = node_text(field, src).to_string();
                if operand.kind() == "identifier" && import_aliases.contains(&base) {
                    Some(CallInfo {
                        callee,
                        package: Some(base),
                        kind: CallKind::External,
                        receiver_type: None,
                        arg_types,
                    })
                } else {
                    Some(CallInfo {
                        callee,
                        package: None,
                        kind: CallKind::Method,
                        receiver_type: Some(base),
                        arg_types,
                    })
                }
            }
            _ => None,
        }
    }
}

fn qualified_package(node: Node<'_>, src: &str, aliases: &HashSet<String>) -> Option<String> {
    let parent = node.parent()?;
    if parent.kind() != "qualified_type" {
        return None;
    }
    let pkg = parent.child_by_field_name("package")?;
    let name = node_text(pkg, src).to_string();
    aliases.contains(&name).then_some(name)
}

/// Name of a top-level declaration node, when it has one.
pub fn declaration_name(node: Node<'_>, src: &str) -> Option<String> {
    match node.kind() {
        "function_declaration" | "method_declaration" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, src).to_string()),
        "type_declaration" | "const_declaration" | "var_declaration" => {
            let mut found = None;
            walk(node, &mut |n| {
                if found.is_none()
                    && matches!(n.kind(), "type_spec" | "const_spec" | "var_spec")
                {
                    found = n
                        .child_by_field_name("name")
                        .map(|name| node_text(name, src).to_string());
                }
            });
            found
        }
        _ => None,
    }
}

/// Argument type names recoverable without type inference: composite
/// literal types and address-of composite literals.
fn argument_types(call: Node<'_>, src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let Some(args) = call.child_by_field_name("arguments") else {
        return out;
    };
    let mut cursor = args.walk();
    for arg in args.named_children(&mut cursor) {
        let lit = match arg.kind() {
            "composite_literal" => Some(arg),
            "unary_expression" => arg
                .child(1)
                .filter(|inner| inner.kind() == "composite_literal"),
            _ => None,
        };
        if let Some(lit) = lit {
            if let Some(ty) = lit.child_by_field_name("type") {
                let name = node_text(ty, src).to_string();
                if !name.is_empty() && !is_primitive_type(&name) {
                    out.push(name);
                }
            }
        }
    }
    out
}

/// Named types referenced by a declaration's parameters, results, receiver,
/// and composite literals, primitives excluded, deduplicated in order.
pub fn declaration_type_deps(decl: Node<'_>, src: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk(decl, &mut |node| {
        if node.kind() != "type_identifier" {
            return;
        }
        let name = node_text(node, src).to_string();
        if is_primitive_type(&name) {
            return;
        }
        // Skip the declaration's own name.
        if let Some(parent) = node.parent() {
            if matches!(parent.kind(), "type_spec") {
                if let Some(spec_name) = parent.child_by_field_name("name") {
                    if spec_name.id() == node.id() {
                        return;
                    }
                }
            }
        }
        let full = match qualified_name(node, src) {
            Some(q) => q,
            None => name,
        };
        if seen.insert(full.clone()) {
            out.push(full);
        }
    });
    out
}

fn qualified_name(node: Node<'_>, src: &str) -> Option<String> {
    let parent = node.parent()?;
    if parent.kind() == "qualified_type" {
        Some(node_text(parent, src).to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse(src: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .unwrap();
        parser.parse(src, None).unwrap()
    }

    const SAMPLE: &str = r#"package svc

import (
	"fmt"
	"strings"
	pb "example.com/acme/orders/internal/proto"
	"github.com/pkg/errors"
)

type Order struct {
	ID    string
	Total float64
}

func Render(o Order) string {
	out := strings.ToUpper(o.ID)
	fmt.Println(out)
	if o.Total > 0 {
		return errors.Wrap(nil, "total").Error()
	}
	return pb.Format(o)
}
"#;

    #[test]
    fn test_import_classification() {
        let analyzer = DependencyAnalyzer::default();
        assert_eq!(analyzer.classify_import("fmt"), ImportClass::Standard);
        assert_eq!(analyzer.classify_import("net/http"), ImportClass::Standard);
        assert_eq!(
            analyzer.classify_import("github.com/pkg/errors"),
            ImportClass::External
        );
        assert_eq!(
            analyzer.classify_import("example.com/acme/orders/internal/proto"),
            ImportClass::Internal
        );
    }

    #[test]
    fn test_module_prefix_is_internal() {
        let manifest = ModuleManifest {
            module_path: Some("example.com/acme/orders".to_string()),
            versions: BTreeMap::new(),
        };
        let analyzer = DependencyAnalyzer::new(manifest);
        assert_eq!(
            analyzer.classify_import("example.com/acme/orders/api"),
            ImportClass::Internal
        );
        assert_eq!(
            analyzer.classify_import("example.com/other/api"),
            ImportClass::External
        );
    }

    #[test]
    fn test_collect_imports_with_alias() {
        let tree = parse(SAMPLE);
        let analyzer = DependencyAnalyzer::default();
        let imports = analyzer.collect_imports(tree.root_node(), SAMPLE);
        assert_eq!(imports.len(), 4);
        let pb = imports.iter().find(|i| i.local_name() == "pb").unwrap();
        assert_eq!(pb.path, "example.com/acme/orders/internal/proto");
        assert_eq!(pb.class, ImportClass::Internal);
    }

    #[test]
    fn test_manifest_versions_resolved() {
        let manifest = parse_go_mod(
            "module example.com/acme/orders\n\nrequire (\n\tgithub.com/pkg/errors v0.9.1\n)\n",
        );
        assert_eq!(
            manifest.module_path.as_deref(),
            Some("example.com/acme/orders")
        );
        let analyzer = DependencyAnalyzer::new(manifest);
        let tree = parse(SAMPLE);
        let imports = analyzer.collect_imports(tree.root_node(), SAMPLE);
        let errors = imports
            .iter()
            .find(|i| i.path == "github.com/pkg/errors")
            .unwrap();
        assert_eq!(errors.version.as_deref(), Some("v0.9.1"));
    }

    #[test]
    fn test_call_kinds() {
        let tree = parse(SAMPLE);
        let analyzer = DependencyAnalyzer::default();
        let analysis = analyzer.analyze(tree.root_node(), SAMPLE);

        let upper = analysis
            .calls
            .iter()
            .find(|c| c.callee == "ToUpper")
            .unwrap();
        assert_eq!(upper.kind, CallKind::External);
        assert_eq!(upper.package.as_deref(), Some("strings"));

        let errmethod = analysis.calls.iter().find(|c| c.callee == "Error").unwrap();
        assert_eq!(errmethod.kind, CallKind::Method);
    }

    #[test]
    fn test_usage_counting() {
        let tree = parse(SAMPLE);
        let analyzer = DependencyAnalyzer::default();
        let analysis = analyzer.analyze(tree.root_node(), SAMPLE);
        let strings_imp = analysis
            .imports
            .iter()
            .find(|i| i.path == "strings")
            .unwrap();
        assert!(strings_imp.usage_count > 0);
        assert!(strings_imp.referenced_by.contains(&"Render".to_string()));
    }

    #[test]
    fn test_type_deps_exclude_primitives() {
        let tree = parse(SAMPLE);
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .children(&mut cursor)
            .find(|n| n.kind() == "function_declaration")
            .unwrap();
        let deps = declaration_type_deps(func, SAMPLE);
        assert!(deps.contains(&"Order".to_string()));
        assert!(!deps.iter().any(|d| d == "string" || d == "float64"));
    }

    #[test]
    fn test_go_mod_single_require_line() {
        let manifest = parse_go_mod("module m.io/x\nrequire golang.org/x/sync v0.7.0\n");
        assert_eq!(
            manifest.versions.get("golang.org/x/sync").map(String::as_str),
            Some("v0.7.0")
        );
    }
}
