//! Content-type detection for ingested files.
//!
//! Maps `(path, bytes)` to a MIME-style label: a fixed basename/extension
//! table first, then byte sniffing, then `text/plain`. Pure functions, no
//! I/O. Also derives the language tag used by the chunker registry and the
//! coarse domain classification stored on file records.

use crate::models::FileDomain;

/// MIME-style label for Go source; selects the AST chunking path.
pub const GO: &str = "text/x-go";
/// Markdown and similar markup; selects the heading-based chunking path.
pub const MARKDOWN: &str = "text/markdown";
pub const PLAIN: &str = "text/plain";
pub const JSON: &str = "application/json";
pub const YAML: &str = "application/yaml";
pub const BINARY: &str = "application/octet-stream";

/// Detect the content type of a file from its path and raw bytes.
pub fn detect(path: &str, bytes: &[u8]) -> &'static str {
    if let Some(ct) = detect_by_name(path) {
        return ct;
    }
    sniff_bytes(bytes)
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(path: &str) -> Option<&str> {
    let base = basename(path);
    base.rsplit_once('.').map(|(_, ext)| ext)
}

/// Fixed table keyed by basename or extension.
fn detect_by_name(path: &str) -> Option<&'static str> {
    let base = basename(path);
    match base {
        "Dockerfile" | "Containerfile" => return Some("text/x-dockerfile"),
        "Makefile" | "makefile" | "GNUmakefile" => return Some("text/x-makefile"),
        "go.mod" => return Some("text/x-go-mod"),
        "go.sum" => return Some(PLAIN),
        _ => {}
    }

    let ext = extension(path)?;
    let ct = match ext {
        "go" => GO,
        "md" | "markdown" | "mdx" => MARKDOWN,
        "json" => JSON,
        "yaml" | "yml" => YAML,
        "toml" => "application/toml",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "java" => "text/x-java",
        "ts" | "tsx" => "text/x-typescript",
        "js" | "jsx" => "text/x-javascript",
        "c" | "h" => "text/x-c",
        "cpp" | "cc" | "hpp" => "text/x-c++",
        "sh" | "bash" => "text/x-shellscript",
        "sql" => "application/sql",
        "proto" => "text/x-protobuf",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "xml" => "application/xml",
        "txt" | "text" => PLAIN,
        "csv" => "text/csv",
        _ => return None,
    };
    Some(ct)
}

/// Byte-based sniffing for files the name table does not cover.
fn sniff_bytes(bytes: &[u8]) -> &'static str {
    if bytes.is_empty() {
        return PLAIN;
    }
    // NUL in the first kilobyte marks binary content.
    let probe = &bytes[..bytes.len().min(1024)];
    if probe.contains(&0) {
        return BINARY;
    }
    if std::str::from_utf8(probe).is_err() {
        return BINARY;
    }
    let text = String::from_utf8_lossy(probe);
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return JSON;
    }
    if trimmed.starts_with("#!") {
        return "text/x-shellscript";
    }
    PLAIN
}

/// Language tag for a content type, when one applies.
pub fn language_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        GO => Some("go"),
        "text/x-rust" => Some("rust"),
        "text/x-python" => Some("python"),
        "text/x-java" => Some("java"),
        "text/x-typescript" => Some("typescript"),
        "text/x-javascript" => Some("javascript"),
        "text/x-c" => Some("c"),
        "text/x-c++" => Some("cpp"),
        "text/x-shellscript" => Some("shell"),
        MARKDOWN => Some("markdown"),
        _ => None,
    }
}

/// Classify a file's coarse role from its path.
pub fn classify_domain(path: &str) -> FileDomain {
    let lower = path.to_ascii_lowercase();
    let base = basename(&lower);

    if base.ends_with("_test.go")
        || base.starts_with("test_")
        || lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.contains("/testdata/")
    {
        return FileDomain::Tests;
    }
    if base.ends_with(".md") || lower.contains("/docs/") || lower.contains("/doc/") {
        return FileDomain::Architecture;
    }
    if base == "dockerfile"
        || base == "docker-compose.yml"
        || base == "docker-compose.yaml"
        || lower.contains("/terraform/")
        || lower.contains("/helm/")
        || lower.contains("/k8s/")
        || base.ends_with(".tf")
    {
        return FileDomain::Infra;
    }
    if lower.contains("/.github/")
        || lower.contains("/ci/")
        || lower.contains("/scripts/")
        || base.ends_with(".sh")
        || base == "makefile"
    {
        return FileDomain::Ops;
    }
    FileDomain::Code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(detect("cmd/main.go", b"package main"), GO);
        assert_eq!(detect("README.md", b"# Title"), MARKDOWN);
        assert_eq!(detect("conf.json", b"{}"), JSON);
        assert_eq!(detect("deploy.yaml", b"a: b"), YAML);
    }

    #[test]
    fn test_detect_by_basename() {
        assert_eq!(detect("build/Dockerfile", b"FROM alpine"), "text/x-dockerfile");
        assert_eq!(detect("go.mod", b"module x"), "text/x-go-mod");
    }

    #[test]
    fn test_sniff_binary() {
        assert_eq!(detect("blob", &[0x00, 0x01, 0x02]), BINARY);
        assert_eq!(detect("blob.bin", &[0xff, 0x00]), BINARY);
    }

    #[test]
    fn test_sniff_json_and_shebang() {
        assert_eq!(detect("payload", b"  {\"k\": 1}"), JSON);
        assert_eq!(detect("run", b"#!/bin/sh\necho hi"), "text/x-shellscript");
    }

    #[test]
    fn test_unknown_text_falls_back_to_plain() {
        assert_eq!(detect("NOTES", b"plain prose here"), PLAIN);
        assert_eq!(detect("empty", b""), PLAIN);
    }

    #[test]
    fn test_language_mapping() {
        assert_eq!(language_for(GO), Some("go"));
        assert_eq!(language_for(PLAIN), None);
    }

    #[test]
    fn test_domain_classification() {
        assert_eq!(classify_domain("pkg/server/server.go"), FileDomain::Code);
        assert_eq!(classify_domain("pkg/server/server_test.go"), FileDomain::Tests);
        assert_eq!(classify_domain("docs/design.md"), FileDomain::Architecture);
        assert_eq!(classify_domain("deploy/Dockerfile"), FileDomain::Infra);
        assert_eq!(classify_domain(".github/workflows/ci.yml"), FileDomain::Ops);
        assert_eq!(classify_domain("scripts/release.sh"), FileDomain::Ops);
    }
}
