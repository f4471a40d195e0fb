//! AST-driven chunker for Go source.
//!
//! Emits three levels of chunks per file:
//!
//! 1. a package-doc chunk from the file's leading documentation,
//! 2. one declaration chunk per top-level declaration, covering the doc
//!    comment through the closing brace and carrying kind, name, signature,
//!    dependency arrays, and quality metrics,
//! 3. logic-block chunks when a function is large (≥ 100 lines) or complex
//!    (cyclomatic ≥ 15), grouped at blank-line boundaries, control
//!    structures, and runs of same-kind statements.
//!
//! The contract is language-agnostic; this is the one grammar the crate
//! ships. On a parse error the chunker degrades to a regex scan over
//! declaration starts and records the failure, so invalid files still
//! produce chunks.

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::{Node, Parser};

use crate::models::{chunk_level, ChunkMetadata, ChunkResult, DependencyInfo, QualityMetrics};
use crate::tokenizer::TokenCounter;

use super::deps::{self, DependencyAnalyzer, ImportClass};
use super::{ChunkLimits, ChunkMetrics, Chunker};

/// Line count at which a function gets logic-block chunks.
const LOGIC_SPLIT_LINES: u32 = 100;
/// Cyclomatic complexity at which a function gets logic-block chunks.
const LOGIC_SPLIT_COMPLEXITY: u32 = 15;
/// Chunks whose comment ratio exceeds this are dropped.
const MAX_COMMENT_RATIO: f32 = 0.95;

pub struct GoAstChunker {
    limits: ChunkLimits,
    counter: TokenCounter,
    metrics: Arc<ChunkMetrics>,
    analyzer: DependencyAnalyzer,
}

impl GoAstChunker {
    pub fn new(limits: ChunkLimits, counter: TokenCounter, metrics: Arc<ChunkMetrics>) -> Self {
        Self {
            limits,
            counter,
            metrics,
            analyzer: DependencyAnalyzer::default(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: DependencyAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }
}

impl Chunker for GoAstChunker {
    fn chunk(&self, path: &str, content: &str) -> Result<Vec<ChunkResult>> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| anyhow::anyhow!("loading Go grammar: {e}"))?;

        match parser.parse(content, None) {
            Some(tree) if !tree.root_node().has_error() => {
                self.chunk_tree(tree.root_node(), content)
            }
            _ => {
                tracing::debug!(path, "syntax error, falling back to declaration scan");
                self.metrics.record_parse_failure();
                self.regex_fallback(path, content)
            }
        }
    }
}

// ── AST path ────────────────────────────────────────────────────────────

impl GoAstChunker {
    fn chunk_tree(&self, root: Node<'_>, src: &str) -> Result<Vec<ChunkResult>> {
        let imports = self.analyzer.collect_imports(root, src);
        let import_aliases: std::collections::HashSet<String> =
            imports.iter().map(|i| i.local_name().to_string()).collect();
        let import_paths: Vec<String> = imports.iter().map(|i| i.path.clone()).collect();
        let standard_imports: Vec<String> = imports
            .iter()
            .filter(|i| i.class == ImportClass::Standard)
            .map(|i| i.path.clone())
            .collect();
        let external_imports: Vec<String> = imports
            .iter()
            .filter(|i| i.class != ImportClass::Standard)
            .map(|i| i.path.clone())
            .collect();

        let mut out = Vec::new();

        if let Some(pkg_doc) = self.package_doc_chunk(root, src) {
            out.push(pkg_doc);
        }

        let mut cursor = root.walk();
        for decl in root.children(&mut cursor) {
            let kind = match decl.kind() {
                "function_declaration" => "function",
                "method_declaration" => "method",
                "type_declaration" => type_decl_kind(decl),
                "const_declaration" => "const",
                "var_declaration" => "var",
                _ => continue,
            };

            let (doc_start_byte, doc_start_row, doc_text) = leading_doc(decl, src);
            let content_slice = &src[doc_start_byte..decl.end_byte()];
            let start_line = doc_start_row + 1;
            let end_line = decl.end_position().row as u32 + 1;

            let name = deps::declaration_name(decl, src);
            let parent_name = receiver_type(decl, src);
            let signature = declaration_signature(decl, src);
            let complexity = cyclomatic_complexity(decl, src);
            let (comment_lines, non_blank) = comment_stats(content_slice);
            let comment_ratio = if non_blank == 0 {
                0.0
            } else {
                comment_lines as f32 / non_blank as f32
            };

            if comment_ratio > MAX_COMMENT_RATIO {
                self.metrics.record_comment_ratio_drop();
                continue;
            }

            let (internal_calls, external_calls) = called_symbols(decl, src, &import_aliases);
            let metadata = ChunkMetadata {
                level: chunk_level::DECLARATION,
                kind: kind.to_string(),
                name: name.clone(),
                parent_name,
                signature: signature.clone(),
                doc_comment: doc_text,
                metrics: QualityMetrics {
                    lines_of_code: non_blank as u32,
                    comment_ratio,
                    cyclomatic_complexity: complexity,
                },
                dependencies: DependencyInfo {
                    imports: import_paths.clone(),
                    standard_imports: standard_imports.clone(),
                    external_imports: external_imports.clone(),
                    internal_calls,
                    external_calls,
                    type_dependencies: deps::declaration_type_deps(decl, src),
                },
            };

            let min_tokens = if matches!(kind, "struct" | "interface" | "type") {
                self.limits.ast_type_min_tokens
            } else {
                self.limits.ast_min_tokens
            };

            if let Some(chunk) =
                self.finish_chunk(content_slice, start_line, end_line, metadata, min_tokens)?
            {
                out.push(chunk);
            }

            // Large or complex functions additionally get logic blocks.
            let line_count = end_line - start_line + 1;
            if matches!(kind, "function" | "method")
                && (line_count >= LOGIC_SPLIT_LINES || complexity >= LOGIC_SPLIT_COMPLEXITY)
            {
                self.logic_blocks(decl, src, name.as_deref(), signature.as_deref(), &mut out)?;
            }
        }

        Ok(out)
    }

    /// Token-filter, trim oversize content, and build the final record.
    fn finish_chunk(
        &self,
        content: &str,
        start_line: u32,
        end_line: u32,
        metadata: ChunkMetadata,
        min_tokens: usize,
    ) -> Result<Option<ChunkResult>> {
        let mut content = content.to_string();
        let mut token_count = self.counter.count(&content);
        let mut end_line = end_line;

        if token_count < min_tokens {
            self.metrics.record_token_range_drop();
            return Ok(None);
        }
        if token_count > self.limits.max_tokens {
            // Declarations are never silently lost: oversize ones keep
            // their head up to the token cap.
            content = self.counter.trim(&content, self.limits.max_tokens)?;
            token_count = self.counter.count(&content);
            end_line = start_line + content.lines().count().saturating_sub(1) as u32;
        }

        Ok(Some(ChunkResult {
            content,
            start_line,
            end_line,
            token_count,
            metadata,
        }))
    }

    /// Level-1 chunk from the file's leading documentation comments.
    fn package_doc_chunk(&self, root: Node<'_>, src: &str) -> Option<ChunkResult> {
        let mut cursor = root.walk();
        let mut doc_nodes = Vec::new();
        let mut package_name = None;
        for child in root.children(&mut cursor) {
            match child.kind() {
                "comment" => doc_nodes.push(child),
                "package_clause" => {
                    package_name = child
                        .named_child(0)
                        .map(|n| deps::node_text(n, src).to_string());
                    break;
                }
                _ => break,
            }
        }
        let (first, last) = (doc_nodes.first()?, doc_nodes.last()?);
        let content = &src[first.start_byte()..last.end_byte()];
        let token_count = self.counter.count(content);
        if token_count < self.limits.ast_min_tokens {
            return None;
        }
        Some(ChunkResult {
            content: content.to_string(),
            start_line: first.start_position().row as u32 + 1,
            end_line: last.end_position().row as u32 + 1,
            token_count,
            metadata: ChunkMetadata {
                level: chunk_level::FILE,
                kind: "package".to_string(),
                name: package_name,
                doc_comment: Some(strip_comment_markers(content)),
                ..ChunkMetadata::default()
            },
        })
    }

    // ── logic blocks ────────────────────────────────────────────────────

    fn logic_blocks(
        &self,
        decl: Node<'_>,
        src: &str,
        parent: Option<&str>,
        signature: Option<&str>,
        out: &mut Vec<ChunkResult>,
    ) -> Result<()> {
        let Some(body) = decl.child_by_field_name("body") else {
            return Ok(());
        };

        let mut groups: Vec<StatementGroup> = Vec::new();
        let mut current: Option<StatementGroup> = None;
        let mut cursor = body.walk();

        for stmt in body.named_children(&mut cursor) {
            if stmt.kind() == "comment" {
                // Comments act as group boundaries, like blank lines.
                if let Some(group) = current.take() {
                    groups.push(group);
                }
                continue;
            }
            let kind = statement_kind(stmt, src);
            let start_row = stmt.start_position().row as u32;
            let end_row = stmt.end_position().row as u32;

            // Significant control structures stand alone.
            if kind.is_control() {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
                groups.push(StatementGroup {
                    kind,
                    start_row,
                    end_row,
                    statements: 1,
                });
                continue;
            }

            // Consecutive same-kind statements with no blank line between
            // them stay in one group.
            let extends = matches!(
                &current,
                Some(group) if group.kind == kind && start_row <= group.end_row + 1
            );
            if extends {
                let group = current.as_mut().expect("checked above");
                group.end_row = end_row;
                group.statements += 1;
            } else {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
                current = Some(StatementGroup {
                    kind,
                    start_row,
                    end_row,
                    statements: 1,
                });
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        let lines: Vec<&str> = src.lines().collect();
        for group in groups {
            let tag = group.tag();
            let slice = lines[group.start_row as usize..=(group.end_row as usize).min(lines.len() - 1)]
                .join("\n");
            let token_count = self.counter.count(&slice);
            if token_count < self.limits.ast_min_tokens || token_count > self.limits.max_tokens {
                self.metrics.record_token_range_drop();
                continue;
            }
            out.push(ChunkResult {
                content: slice,
                start_line: group.start_row + 1,
                end_line: group.end_row + 1,
                token_count,
                metadata: ChunkMetadata {
                    level: chunk_level::LOGIC_BLOCK,
                    kind: format!("logic_{tag}"),
                    name: parent.map(|p| p.to_string()),
                    parent_name: parent.map(|p| p.to_string()),
                    signature: signature.map(|s| s.to_string()),
                    ..ChunkMetadata::default()
                },
            });
        }
        Ok(())
    }

    // ── regex fallback ──────────────────────────────────────────────────

    /// Declaration scan used when the syntax tree is broken. Coarser than
    /// the AST path: kind and name come from the declaration line alone.
    fn regex_fallback(&self, path: &str, content: &str) -> Result<Vec<ChunkResult>> {
        static DECL_START: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(func|type|const|var|package)\b").unwrap());
        static FUNC_NAME: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^func\s+(?:\((?P<recv>[^)]*)\)\s*)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
                .unwrap()
        });
        static TYPE_NAME: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^(?:type|const|var)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)").unwrap()
        });

        let lines: Vec<&str> = content.lines().collect();
        let mut starts: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| DECL_START.is_match(l))
            .map(|(i, _)| i)
            .collect();

        if starts.is_empty() {
            // Nothing declaration-shaped; hand the file to the line path.
            let text = super::text::LineChunker::new(
                self.limits.clone(),
                self.counter.clone(),
                Arc::clone(&self.metrics),
            );
            return text.chunk(path, content);
        }
        starts.push(lines.len());

        let mut out = Vec::new();
        for window in starts.windows(2) {
            let (start, end) = (window[0], window[1]);
            let slice = lines[start..end].join("\n");
            let first = lines[start];

            let (kind, name, parent) = if let Some(caps) = FUNC_NAME.captures(first) {
                let kind = if caps.name("recv").is_some() {
                    "method"
                } else {
                    "function"
                };
                (
                    kind,
                    caps.name("name").map(|m| m.as_str().to_string()),
                    caps.name("recv")
                        .map(|m| m.as_str().trim_start_matches('*').trim().to_string()),
                )
            } else if first.starts_with("package") {
                continue;
            } else {
                let kind = if slice.contains("struct {") {
                    "struct"
                } else if slice.contains("interface {") {
                    "interface"
                } else if first.starts_with("const") {
                    "const"
                } else if first.starts_with("var") {
                    "var"
                } else {
                    "type"
                };
                (
                    kind,
                    TYPE_NAME
                        .captures(first)
                        .and_then(|c| c.name("name"))
                        .map(|m| m.as_str().to_string()),
                    None,
                )
            };

            let (comment_lines, non_blank) = comment_stats(&slice);
            let comment_ratio = if non_blank == 0 {
                0.0
            } else {
                comment_lines as f32 / non_blank as f32
            };
            if comment_ratio > MAX_COMMENT_RATIO {
                self.metrics.record_comment_ratio_drop();
                continue;
            }

            let min_tokens = if matches!(kind, "struct" | "interface" | "type") {
                self.limits.ast_type_min_tokens
            } else {
                self.limits.ast_min_tokens
            };
            let metadata = ChunkMetadata {
                level: chunk_level::DECLARATION,
                kind: kind.to_string(),
                name,
                parent_name: parent,
                metrics: QualityMetrics {
                    lines_of_code: non_blank as u32,
                    comment_ratio,
                    cyclomatic_complexity: 0,
                },
                ..ChunkMetadata::default()
            };
            if let Some(chunk) = self.finish_chunk(
                &slice,
                start as u32 + 1,
                end as u32,
                metadata,
                min_tokens,
            )? {
                out.push(chunk);
            }
        }
        Ok(out)
    }
}

// ── statement grouping ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    ErrorHandling,
    Conditional,
    Loop,
    Switch,
    ChannelSelect,
    Defer,
    Return,
    Initialization,
    Assignment,
    Statement,
}

impl StatementKind {
    fn is_control(self) -> bool {
        matches!(
            self,
            StatementKind::ErrorHandling
                | StatementKind::Conditional
                | StatementKind::Loop
                | StatementKind::Switch
                | StatementKind::ChannelSelect
        )
    }

    fn tag(self) -> &'static str {
        match self {
            StatementKind::ErrorHandling => "error_handling",
            StatementKind::Conditional => "conditional",
            StatementKind::Loop => "loop",
            StatementKind::Switch => "switch",
            StatementKind::ChannelSelect => "channel_select",
            StatementKind::Defer => "defer",
            StatementKind::Return => "return",
            StatementKind::Initialization => "initialization",
            StatementKind::Assignment => "assignment",
            StatementKind::Statement => "statement",
        }
    }
}

#[derive(Debug)]
struct StatementGroup {
    kind: StatementKind,
    start_row: u32,
    end_row: u32,
    statements: usize,
}

impl StatementGroup {
    fn tag(&self) -> &'static str {
        // Long runs of plain statements are the function's main logic.
        if self.kind == StatementKind::Statement && self.statements >= 3 {
            "main_logic"
        } else {
            self.kind.tag()
        }
    }
}

fn statement_kind(stmt: Node<'_>, src: &str) -> StatementKind {
    match stmt.kind() {
        "if_statement" => {
            let cond = stmt
                .child_by_field_name("condition")
                .map(|c| deps::node_text(c, src))
                .unwrap_or("");
            if cond.contains("err != nil") || cond.contains("err == nil") {
                StatementKind::ErrorHandling
            } else {
                StatementKind::Conditional
            }
        }
        "for_statement" => StatementKind::Loop,
        "expression_switch_statement" | "type_switch_statement" => StatementKind::Switch,
        "select_statement" => StatementKind::ChannelSelect,
        "defer_statement" => StatementKind::Defer,
        "return_statement" => StatementKind::Return,
        "short_var_declaration" | "var_declaration" | "const_declaration" => {
            StatementKind::Initialization
        }
        "assignment_statement" | "inc_statement" | "dec_statement" => StatementKind::Assignment,
        _ => StatementKind::Statement,
    }
}

// ── metrics and extraction helpers ──────────────────────────────────────

/// McCabe complexity: 1 plus one per branching construct and
/// short-circuit operator.
pub fn cyclomatic_complexity(decl: Node<'_>, src: &str) -> u32 {
    let mut complexity = 1;
    deps::walk(decl, &mut |node| match node.kind() {
        "if_statement" | "for_statement" => complexity += 1,
        "expression_case" | "type_case" | "default_case" | "communication_case" => complexity += 1,
        "binary_expression" => {
            if let Some(op) = node.child_by_field_name("operator") {
                let text = deps::node_text(op, src);
                if text == "&&" || text == "||" {
                    complexity += 1;
                }
            }
        }
        _ => {}
    });
    complexity
}

/// (comment lines, non-blank lines). Block comments are counted
/// line-by-line.
fn comment_stats(content: &str) -> (usize, usize) {
    let mut comment_lines = 0;
    let mut non_blank = 0;
    let mut in_block = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        non_blank += 1;
        if in_block {
            comment_lines += 1;
            if trimmed.contains("*/") {
                in_block = false;
            }
        } else if trimmed.starts_with("//") {
            comment_lines += 1;
        } else if trimmed.starts_with("/*") {
            comment_lines += 1;
            if !trimmed.contains("*/") {
                in_block = true;
            }
        }
    }
    (comment_lines, non_blank)
}

/// Contiguous comment block directly above a declaration: returns the byte
/// offset and row where the chunk should start plus the cleaned doc text.
fn leading_doc(decl: Node<'_>, src: &str) -> (usize, u32, Option<String>) {
    let mut first: Option<Node<'_>> = None;
    let mut cursor = decl;
    let mut expected_row = decl.start_position().row;

    while let Some(prev) = cursor.prev_sibling() {
        if prev.kind() != "comment" || prev.end_position().row + 1 != expected_row {
            break;
        }
        expected_row = prev.start_position().row;
        first = Some(prev);
        cursor = prev;
    }

    match first {
        Some(node) => {
            let text = &src[node.start_byte()..decl.start_byte()];
            (
                node.start_byte(),
                node.start_position().row as u32,
                Some(strip_comment_markers(text.trim_end())),
            )
        }
        None => (decl.start_byte(), decl.start_position().row as u32, None),
    }
}

fn strip_comment_markers(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("//")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Signature of a function or method: declaration head up to the body,
/// collapsed to one line.
fn declaration_signature(decl: Node<'_>, src: &str) -> Option<String> {
    if !matches!(decl.kind(), "function_declaration" | "method_declaration") {
        return None;
    }
    let end = decl
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| decl.end_byte());
    let head = &src[decl.start_byte()..end];
    Some(head.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Receiver type of a method declaration, pointer stripped.
fn receiver_type(decl: Node<'_>, src: &str) -> Option<String> {
    if decl.kind() != "method_declaration" {
        return None;
    }
    let receiver = decl.child_by_field_name("receiver")?;
    let mut found = None;
    deps::walk(receiver, &mut |node| {
        if found.is_none() && node.kind() == "type_identifier" {
            found = Some(deps::node_text(node, src).to_string());
        }
    });
    found
}

/// Kind of a type declaration, taken from its first spec.
fn type_decl_kind(decl: Node<'_>) -> &'static str {
    let mut kind = "type";
    deps::walk(decl, &mut |node| {
        if kind == "type" {
            match node.kind() {
                "struct_type" => kind = "struct",
                "interface_type" => kind = "interface",
                _ => {}
            }
        }
    });
    kind
}

/// Deduplicated called symbols of a declaration, partitioned into
/// package-local and import-qualified.
fn called_symbols(
    decl: Node<'_>,
    src: &str,
    import_aliases: &std::collections::HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut internal = Vec::new();
    let mut external = Vec::new();
    deps::walk(decl, &mut |node| {
        if node.kind() != "call_expression" {
            return;
        }
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        match function.kind() {
            "identifier" => {
                let name = deps::node_text(function, src).to_string();
                if !deps::is_builtin_func(&name) && !internal.contains(&name) {
                    internal.push(name);
                }
            }
            "selector_expression" => {
                let text = deps::node_text(function, src).to_string();
                let base = text.split('.').next().unwrap_or("");
                let target = if import_aliases.contains(base) {
                    &mut external
                } else {
                    &mut internal
                };
                if !target.contains(&text) {
                    target.push(text);
                }
            }
            _ => {}
        }
    });
    (internal, external)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> GoAstChunker {
        GoAstChunker::new(
            ChunkLimits::default(),
            TokenCounter::default(),
            Arc::new(ChunkMetrics::default()),
        )
    }

    fn chunker_with_metrics(metrics: Arc<ChunkMetrics>) -> GoAstChunker {
        GoAstChunker::new(ChunkLimits::default(), TokenCounter::default(), metrics)
    }

    const SAMPLE: &str = r#"// Package greet renders greetings.
package greet

import (
	"fmt"
	"strings"
)

// Greeter holds the rendering configuration for greetings.
type Greeter struct {
	Prefix string
	Loud   bool
}

// Greet renders a greeting for the given name using the prefix.
func (g Greeter) Greet(name string) string {
	out := g.Prefix + ", " + name
	if g.Loud {
		out = strings.ToUpper(out)
	}
	return out
}

// Render prints a greeting for every name in the list provided.
func Render(names []string) {
	g := Greeter{Prefix: "hello"}
	for _, n := range names {
		fmt.Println(g.Greet(n))
	}
}
"#;

    #[test]
    fn test_every_declaration_yields_a_chunk() {
        let chunks = chunker().chunk("greet.go", SAMPLE).unwrap();
        let decls: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.level == chunk_level::DECLARATION)
            .collect();
        assert_eq!(decls.len(), 3, "struct + method + function");
        let names: Vec<_> = decls
            .iter()
            .map(|c| c.metadata.name.as_deref().unwrap_or(""))
            .collect();
        assert!(names.contains(&"Greeter"));
        assert!(names.contains(&"Greet"));
        assert!(names.contains(&"Render"));
    }

    #[test]
    fn test_package_doc_chunk() {
        let chunks = chunker().chunk("greet.go", SAMPLE).unwrap();
        let pkg = chunks
            .iter()
            .find(|c| c.metadata.kind == "package")
            .expect("package doc chunk");
        assert_eq!(pkg.metadata.level, chunk_level::FILE);
        assert_eq!(pkg.start_line, 1);
        assert!(pkg
            .metadata
            .doc_comment
            .as_deref()
            .unwrap()
            .contains("renders greetings"));
    }

    #[test]
    fn test_method_metadata() {
        let chunks = chunker().chunk("greet.go", SAMPLE).unwrap();
        let method = chunks
            .iter()
            .find(|c| c.metadata.kind == "method")
            .unwrap();
        assert_eq!(method.metadata.name.as_deref(), Some("Greet"));
        assert_eq!(method.metadata.parent_name.as_deref(), Some("Greeter"));
        let sig = method.metadata.signature.as_deref().unwrap();
        assert!(sig.contains("func (g Greeter) Greet(name string) string"));
        assert!(method
            .metadata
            .dependencies
            .external_calls
            .contains(&"strings.ToUpper".to_string()));
        // Doc comment included in the span.
        assert!(method.content.starts_with("// Greet renders"));
    }

    #[test]
    fn test_imports_partitioned() {
        let chunks = chunker().chunk("greet.go", SAMPLE).unwrap();
        let func = chunks
            .iter()
            .find(|c| c.metadata.kind == "function")
            .unwrap();
        assert_eq!(
            func.metadata.dependencies.standard_imports,
            vec!["fmt".to_string(), "strings".to_string()]
        );
        assert!(func.metadata.dependencies.external_imports.is_empty());
    }

    #[test]
    fn test_type_dependencies_recorded() {
        let chunks = chunker().chunk("greet.go", SAMPLE).unwrap();
        let func = chunks
            .iter()
            .find(|c| c.metadata.name.as_deref() == Some("Render"))
            .unwrap();
        assert!(func
            .metadata
            .dependencies
            .type_dependencies
            .contains(&"Greeter".to_string()));
    }

    #[test]
    fn test_ordering_by_start_line() {
        let chunks = chunker().chunk("greet.go", SAMPLE).unwrap();
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
        }
    }

    #[test]
    fn test_complexity_counts_branches() {
        let src = r#"package p

func Classify(n int, strict bool) string {
	if n > 10 && strict {
		return "big"
	}
	for i := 0; i < n; i++ {
		switch i {
		case 1:
			n++
		case 2:
			n--
		default:
			n = 0
		}
	}
	return "ok"
}
"#;
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .unwrap();
        let tree = parser.parse(src, None).unwrap();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .children(&mut cursor)
            .find(|n| n.kind() == "function_declaration")
            .unwrap();
        // 1 + if + && + for + 3 cases = 7
        assert_eq!(cyclomatic_complexity(func, src), 7);
    }

    #[test]
    fn test_high_comment_ratio_dropped() {
        let mut src = String::from("package p\n\n");
        src.push_str("// The declaration below is nothing but commentary\n");
        for i in 0..40 {
            src.push_str(&format!("// filler commentary line number {i}\n"));
        }
        src.push_str("var x = 1\n");
        let metrics = Arc::new(ChunkMetrics::default());
        let chunks = chunker_with_metrics(Arc::clone(&metrics))
            .chunk("doc.go", &src)
            .unwrap();
        assert!(chunks
            .iter()
            .all(|c| c.metadata.name.as_deref() != Some("x")));
        assert_eq!(metrics.comment_ratio_drops(), 1);
    }

    #[test]
    fn test_parse_failure_falls_back_to_regex() {
        let src = "package p\n\nfunc Broken( {\n\tthis is not go\n}\n\nfunc Fine(a int) int {\n\treturn a + a + a\n}\n";
        let metrics = Arc::new(ChunkMetrics::default());
        let chunks = chunker_with_metrics(Arc::clone(&metrics))
            .chunk("broken.go", src)
            .unwrap();
        assert_eq!(metrics.parse_failures(), 1);
        assert!(!chunks.is_empty(), "regex path still produces chunks");
    }

    #[test]
    fn test_logic_split_on_high_complexity() {
        let mut body = String::new();
        for i in 0..16 {
            body.push_str(&format!(
                "\tif input > {i} {{\n\t\ttotal = total + {i}\n\t}}\n"
            ));
        }
        let src = format!(
            "package p\n\nfunc Accumulate(input int) int {{\n\ttotal := 0\n{body}\treturn total\n}}\n"
        );
        let chunks = chunker().chunk("acc.go", &src).unwrap();
        let logic: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.level == chunk_level::LOGIC_BLOCK)
            .collect();
        assert!(!logic.is_empty(), "complexity 17 must trigger logic blocks");
        for block in &logic {
            assert!(block.metadata.kind.starts_with("logic_"));
            assert_eq!(block.metadata.parent_name.as_deref(), Some("Accumulate"));
        }
        // The level-2 chunk is still present alongside the blocks.
        assert!(chunks
            .iter()
            .any(|c| c.metadata.level == chunk_level::DECLARATION
                && c.metadata.name.as_deref() == Some("Accumulate")));
    }

    #[test]
    fn test_logic_block_kinds() {
        // 110-line function: a long assignment run, a loop, and an error
        // check, so the line threshold alone triggers the split.
        let mut body = String::new();
        for i in 0..100 {
            body.push_str(&format!("\ttotal = total + input*{i}\n"));
        }
        let src = format!(
            "package p\n\nfunc Driver(input int) int {{\n\ttotal := 0\n{body}\
\tfor i := 0; i < 10; i++ {{\n\t\ttotal = total - i\n\t}}\n\
\tif err != nil {{\n\t\ttotal = 0\n\t\treturn total\n\t}}\n\
\treturn total\n}}\n"
        );
        let chunks = chunker().chunk("driver.go", &src).unwrap();
        let kinds: Vec<_> = chunks
            .iter()
            .filter(|c| c.metadata.level == chunk_level::LOGIC_BLOCK)
            .map(|c| c.metadata.kind.clone())
            .collect();
        assert!(!kinds.is_empty(), "110-line function must split");
        assert!(kinds.iter().all(|k| k.starts_with("logic_")));
        assert!(kinds.contains(&"logic_assignment".to_string()));
        assert!(kinds.contains(&"logic_loop".to_string()));
        assert!(kinds.contains(&"logic_error_handling".to_string()));
    }

    #[test]
    fn test_tiny_declarations_dropped() {
        let src = "package p\n\nvar x = 1\n";
        let metrics = Arc::new(ChunkMetrics::default());
        let chunks = chunker_with_metrics(Arc::clone(&metrics))
            .chunk("tiny.go", src)
            .unwrap();
        assert!(chunks.is_empty());
        assert_eq!(metrics.token_range_drops(), 1);
    }
}
