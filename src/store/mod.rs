//! Persistence port for the ingestion and summary engines.
//!
//! The [`Store`] trait is the only way the core touches storage, enabling
//! pluggable backends: [`memory::MemoryStore`] for tests and
//! [`sqlite::SqliteStore`] for production. Implementations must be
//! `Send + Sync`; the pipeline calls them from many workers concurrently
//! and takes no locks of its own.
//!
//! Semantics every backend must honor:
//!
//! - `create_snapshot` returns [`StoreError::SnapshotVersionConflict`] when
//!   `(source_id, version)` already exists; callers recover by reloading.
//! - `batch_create_*` is all-or-nothing: on error no row is inserted.
//! - `upsert_summary_embedding` replaces the vector for a summary.
//! - Optional lookups return `Ok(None)`; absence is not a failure.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ArchType, Chunk, Embedding, FileRecord, Product, Source, SourceSnapshot, SourceType, Summary,
    SummaryEmbedding, SummaryType,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The `(source_id, version)` uniqueness constraint was violated. The
    /// ingestion service recovers by reloading and reusing the snapshot.
    #[error("snapshot for source {source_id} at version {version} already exists")]
    SnapshotVersionConflict { source_id: Uuid, version: String },

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(anyhow::anyhow!("{err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A chunk with its similarity score, as returned by vector search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A summary with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredSummary {
    pub summary: Summary,
    pub score: f32,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ── products ───────────────────────────────────────────────────────

    /// Create the product if it does not exist; returns the row either way.
    async fn upsert_product(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<Product>;

    async fn get_product_by_name(&self, name: &str) -> StoreResult<Option<Product>>;

    // ── sources ────────────────────────────────────────────────────────

    /// Create the source if `(product_id, name)` does not exist; refreshes
    /// type and metadata either way.
    async fn upsert_source(
        &self,
        product_id: Uuid,
        name: &str,
        source_type: SourceType,
        metadata: serde_json::Value,
    ) -> StoreResult<Source>;

    async fn list_sources(&self, product_id: Uuid) -> StoreResult<Vec<Source>>;

    // ── snapshots ──────────────────────────────────────────────────────

    async fn create_snapshot(&self, source_id: Uuid, version: &str)
        -> StoreResult<SourceSnapshot>;

    async fn get_snapshot(
        &self,
        source_id: Uuid,
        version: &str,
    ) -> StoreResult<Option<SourceSnapshot>>;

    async fn get_snapshot_by_id(&self, id: Uuid) -> StoreResult<Option<SourceSnapshot>>;

    async fn latest_indexed_snapshot(
        &self,
        source_id: Uuid,
    ) -> StoreResult<Option<SourceSnapshot>>;

    /// All snapshots of a source, newest first.
    async fn list_snapshots(&self, source_id: Uuid) -> StoreResult<Vec<SourceSnapshot>>;

    async fn mark_snapshot_indexed(&self, id: Uuid) -> StoreResult<()>;

    /// Remove a snapshot and everything it owns: files, chunks,
    /// embeddings, summaries.
    async fn delete_snapshot(&self, id: Uuid) -> StoreResult<()>;

    // ── files ──────────────────────────────────────────────────────────

    async fn create_file(&self, file: &FileRecord) -> StoreResult<()>;

    async fn list_files(&self, snapshot_id: Uuid) -> StoreResult<Vec<FileRecord>>;

    async fn delete_files_by_paths(&self, snapshot_id: Uuid, paths: &[String]) -> StoreResult<()>;

    /// Map of path to content hash for all files of a snapshot.
    async fn file_hashes(&self, snapshot_id: Uuid) -> StoreResult<HashMap<String, String>>;

    // ── chunks ─────────────────────────────────────────────────────────

    async fn batch_create_chunks(&self, chunks: &[Chunk]) -> StoreResult<()>;

    /// Chunks of a file, ordered by ordinal.
    async fn list_chunks_by_file(&self, file_id: Uuid) -> StoreResult<Vec<Chunk>>;

    async fn list_chunks_by_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Vec<Chunk>>;

    async fn delete_chunks_by_file(&self, file_id: Uuid) -> StoreResult<()>;

    async fn get_chunk(&self, id: Uuid) -> StoreResult<Option<Chunk>>;

    /// The declaration chunk a logic-block chunk belongs to.
    async fn chunk_parent(&self, chunk: &Chunk) -> StoreResult<Option<Chunk>>;

    /// Logic-block chunks under a declaration, ordered by ordinal.
    async fn chunk_children(&self, file_id: Uuid, parent_name: &str) -> StoreResult<Vec<Chunk>>;

    // ── embeddings ─────────────────────────────────────────────────────

    async fn create_embedding(&self, embedding: &Embedding) -> StoreResult<()>;

    async fn batch_create_embeddings(&self, embeddings: &[Embedding]) -> StoreResult<()>;

    async fn count_embeddings(&self, snapshot_id: Uuid) -> StoreResult<u64>;

    // ── summaries ──────────────────────────────────────────────────────

    async fn create_summary(&self, summary: &Summary) -> StoreResult<()>;

    async fn update_summary(&self, summary: &Summary) -> StoreResult<()>;

    async fn get_summary(
        &self,
        snapshot_id: Uuid,
        summary_type: SummaryType,
        target_path: &str,
        arch_type: Option<ArchType>,
    ) -> StoreResult<Option<Summary>>;

    async fn list_summaries(
        &self,
        snapshot_id: Uuid,
        summary_type: Option<SummaryType>,
    ) -> StoreResult<Vec<Summary>>;

    /// Replace the embedding vector for a summary.
    async fn upsert_summary_embedding(&self, embedding: &SummaryEmbedding) -> StoreResult<()>;

    async fn get_summary_embedding(
        &self,
        summary_id: Uuid,
    ) -> StoreResult<Option<SummaryEmbedding>>;

    // ── vector search (read side for ask/wiki) ─────────────────────────

    async fn vector_search_chunks(
        &self,
        snapshot_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<ScoredChunk>>;

    async fn vector_search_summaries(
        &self,
        snapshot_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<ScoredSummary>>;
}

/// Score a stored embedding against the query embedding: cosine of the
/// angle between them. Degenerate candidates (dimension mismatch with the
/// query, zero vectors) score 0.0 so they sink to the bottom of the
/// ranking instead of erroring the search.
pub fn score_similarity(query: &[f32], candidate: &[f32]) -> f32 {
    if query.len() != candidate.len() {
        return 0.0;
    }
    let (dot, query_sq, candidate_sq) = query.iter().zip(candidate).fold(
        (0.0f32, 0.0f32, 0.0f32),
        |(dot, qs, cs), (q, c)| (dot + q * c, qs + q * q, cs + c * c),
    );
    let scale = (query_sq * candidate_sq).sqrt();
    if scale <= f32::EPSILON {
        return 0.0;
    }
    dot / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_score_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((score_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors_score_zero() {
        assert!(score_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_candidates_sink() {
        // Dimension mismatch and zero vectors rank last, not error.
        assert_eq!(score_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(score_similarity(&[], &[]), 0.0);
        assert_eq!(score_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_conflict_error_formats_context() {
        let err = StoreError::SnapshotVersionConflict {
            source_id: Uuid::nil(),
            version: "c1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("c1"));
        assert!(msg.contains("already exists"));
    }
}
