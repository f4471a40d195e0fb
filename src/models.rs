//! Core data models for the ingestion and summarization pipeline.
//!
//! These types flow from the source provider through chunking and embedding
//! into the store: a [`Product`] groups [`Source`]s, each source is captured
//! as immutable [`SourceSnapshot`]s, and a snapshot owns [`FileRecord`]s,
//! [`Chunk`]s, [`Embedding`]s, and hierarchical [`Summary`] rows.
//!
//! Ownership: Product 1—N Source 1—N SourceSnapshot 1—N FileRecord 1—N Chunk
//! 1—1 Embedding; SourceSnapshot 1—N Summary 1—1 SummaryEmbedding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Named logical grouping of sources. Created on first ingestion request
/// for a given name, never auto-deleted.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of origin a [`Source`] ingests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Confluence,
    Redmine,
    Local,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Git => "git",
            SourceType::Confluence => "confluence",
            SourceType::Redmine => "redmine",
            SourceType::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "git" => Some(SourceType::Git),
            "confluence" => Some(SourceType::Confluence),
            "redmine" => Some(SourceType::Redmine),
            "local" => Some(SourceType::Local),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ingestible origin within a product. `(product_id, name)` is unique.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub source_type: SourceType,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time capture of a source, pinned to a version identifier such
/// as a commit hash. `(source_id, version)` is unique. Once `indexed` flips
/// to true the snapshot is immutable; readers that observe `indexed = true`
/// see a complete snapshot.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub id: Uuid,
    pub source_id: Uuid,
    pub version: String,
    pub indexed: bool,
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Coarse role of a file within the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDomain {
    Code,
    Tests,
    Architecture,
    Infra,
    Ops,
}

impl FileDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileDomain::Code => "code",
            FileDomain::Tests => "tests",
            FileDomain::Architecture => "architecture",
            FileDomain::Infra => "infra",
            FileDomain::Ops => "ops",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(FileDomain::Code),
            "tests" => Some(FileDomain::Tests),
            "architecture" => Some(FileDomain::Architecture),
            "infra" => Some(FileDomain::Infra),
            "ops" => Some(FileDomain::Ops),
            _ => None,
        }
    }
}

/// A file within a snapshot. `(snapshot_id, path)` is unique.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub path: String,
    pub size: i64,
    pub content_type: String,
    pub content_hash: String,
    pub language: Option<String>,
    pub domain: Option<FileDomain>,
}

/// Hierarchy tier of a chunk: file-wide doc, declaration, or logic block.
pub mod chunk_level {
    pub const FILE: u8 = 1;
    pub const DECLARATION: u8 = 2;
    pub const LOGIC_BLOCK: u8 = 3;
}

/// Per-chunk quality metrics computed by the chunker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub lines_of_code: u32,
    /// Comment lines over non-blank lines; chunks above 0.95 are dropped.
    pub comment_ratio: f32,
    pub cyclomatic_complexity: u32,
}

/// Dependency metadata extracted per chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub imports: Vec<String>,
    pub standard_imports: Vec<String>,
    pub external_imports: Vec<String>,
    pub internal_calls: Vec<String>,
    pub external_calls: Vec<String>,
    pub type_dependencies: Vec<String>,
}

impl DependencyInfo {
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
            && self.internal_calls.is_empty()
            && self.external_calls.is_empty()
            && self.type_dependencies.is_empty()
    }
}

/// Structural metadata attached to a [`ChunkResult`] by the chunker.
///
/// Many fields are genuinely absent for some kinds (a `var` has no
/// signature); absence means "not applicable", never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 1 = file/package doc, 2 = declaration, 3 = logic block.
    pub level: u8,
    /// `function` | `method` | `struct` | `interface` | `type` | `const` |
    /// `var` | `package` | `logic_*` | fallback tags such as `text`.
    pub kind: String,
    pub name: Option<String>,
    pub parent_name: Option<String>,
    pub signature: Option<String>,
    pub doc_comment: Option<String>,
    #[serde(default)]
    pub metrics: QualityMetrics,
    #[serde(default)]
    pub dependencies: DependencyInfo,
}

/// Output of a chunker: a substring of the file plus metadata.
/// Lines are 1-based and inclusive; metadata is always present (may be
/// empty for plain-text chunks).
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

/// A persisted chunk: a [`ChunkResult`] materialized with identity,
/// ordinal, and traceability back to its snapshot.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: Uuid,
    pub file_id: Uuid,
    /// 0-based, dense within the file, ordered by start line.
    pub ordinal: i64,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub content_hash: String,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
    pub snapshot_id: Uuid,
    pub commit_hash: Option<String>,
    pub author: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_latest: bool,
    /// Stable cross-snapshot identifier, see [`chunk_key`].
    pub chunk_key: String,
}

/// Embedding vector for a chunk. One per (chunk, model).
#[derive(Debug, Clone)]
pub struct Embedding {
    pub chunk_id: Uuid,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of generated summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    File,
    Directory,
    Architecture,
}

impl SummaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::File => "file",
            SummaryType::Directory => "directory",
            SummaryType::Architecture => "architecture",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(SummaryType::File),
            "directory" => Some(SummaryType::Directory),
            "architecture" => Some(SummaryType::Architecture),
            _ => None,
        }
    }
}

/// Angle of an architecture summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchType {
    Overview,
    TechStack,
    DataFlow,
    Components,
}

impl ArchType {
    pub const ALL: [ArchType; 4] = [
        ArchType::Overview,
        ArchType::TechStack,
        ArchType::DataFlow,
        ArchType::Components,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchType::Overview => "overview",
            ArchType::TechStack => "tech_stack",
            ArchType::DataFlow => "data_flow",
            ArchType::Components => "components",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overview" => Some(ArchType::Overview),
            "tech_stack" => Some(ArchType::TechStack),
            "data_flow" => Some(ArchType::DataFlow),
            "components" => Some(ArchType::Components),
            _ => None,
        }
    }
}

/// A generated narrative for a file, directory, or the whole architecture.
/// Unique per (snapshot_id, summary_type, target_path, arch_type).
#[derive(Debug, Clone)]
pub struct Summary {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub summary_type: SummaryType,
    /// File path, directory path, or empty for architecture summaries.
    pub target_path: String,
    pub depth: Option<u32>,
    pub parent_path: Option<String>,
    pub arch_type: Option<ArchType>,
    pub content: String,
    /// SHA-256 of the generated text.
    pub content_hash: String,
    /// SHA-256 of the inputs that produced this summary; unchanged inputs
    /// mean the summary is skipped on regeneration.
    pub source_hash: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Embedding vector for a summary.
#[derive(Debug, Clone)]
pub struct SummaryEmbedding {
    pub summary_id: Uuid,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Raw document produced by a source provider before chunking.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub content: String,
    pub size: i64,
    pub content_hash: String,
    pub commit_hash: Option<String>,
    pub author: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SourceDocument {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        let content_hash = content_hash(content.as_bytes());
        let size = content.len() as i64;
        Self {
            path,
            content,
            size,
            content_hash,
            commit_hash: None,
            author: None,
            updated_at: None,
        }
    }
}

/// Naming context threaded through the pipeline so chunk keys can be built
/// without further lookups.
#[derive(Debug, Clone)]
pub struct DocContext {
    pub product: String,
    pub source: String,
    pub version: String,
}

/// Lowercase hex SHA-256 (64 chars) of raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of the `:`-joined, lexicographically sorted input
/// hashes. Used to detect staleness of derived summaries.
pub fn source_hash_of(mut child_hashes: Vec<String>) -> String {
    child_hashes.sort();
    content_hash(child_hashes.join(":").as_bytes())
}

/// Deterministic chunk identifier, stable across snapshots of the same
/// version: `<product>/<source>/<path>#L<start>-L<end>:<ordinal>@<version>`.
/// Lines 1-based inclusive, ordinal 0-based. ASCII; used by downstream
/// consumers for provenance, so the format must not change.
pub fn chunk_key(
    product: &str,
    source: &str,
    path: &str,
    start_line: u32,
    end_line: u32,
    ordinal: i64,
    version: &str,
) -> String {
    format!("{product}/{source}/{path}#L{start_line}-L{end_line}:{ordinal}@{version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_lowercase_hex() {
        let h = content_hash(b"hello");
        assert_eq!(h.len(), 64);
        assert!(h
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // SHA-256 of "hello"
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_chunk_key_format() {
        let key = chunk_key("prod", "src", "main.go", 1, 3, 0, "c1");
        assert_eq!(key, "prod/src/main.go#L1-L3:0@c1");
    }

    #[test]
    fn test_source_hash_order_independent() {
        let a = source_hash_of(vec!["bbb".into(), "aaa".into()]);
        let b = source_hash_of(vec!["aaa".into(), "bbb".into()]);
        assert_eq!(a, b);
        assert_eq!(a, content_hash(b"aaa:bbb"));
    }

    #[test]
    fn test_source_type_roundtrip() {
        for t in [
            SourceType::Git,
            SourceType::Confluence,
            SourceType::Redmine,
            SourceType::Local,
        ] {
            assert_eq!(SourceType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SourceType::parse("svn"), None);
    }

    #[test]
    fn test_arch_type_all_covers_every_angle() {
        let names: Vec<&str> = ArchType::ALL.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, ["overview", "tech_stack", "data_flow", "components"]);
    }
}
