//! In-memory [`Store`] implementation for tests.
//!
//! `HashMap`s and `Vec`s behind `std::sync::RwLock`; vector search is a
//! brute-force cosine scan. Enforces the same uniqueness constraints as
//! the SQLite backend so ingestion-service recovery paths are exercisable
//! without a database.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    ArchType, Chunk, Embedding, FileRecord, Product, Source, SourceSnapshot, SourceType, Summary,
    SummaryEmbedding, SummaryType,
};

use super::{
    score_similarity, ScoredChunk, ScoredSummary, Store, StoreError, StoreResult,
};

#[derive(Default)]
struct State {
    products: Vec<Product>,
    sources: Vec<Source>,
    snapshots: Vec<SourceSnapshot>,
    files: Vec<FileRecord>,
    chunks: Vec<Chunk>,
    embeddings: Vec<Embedding>,
    summaries: Vec<Summary>,
    summary_embeddings: HashMap<Uuid, SummaryEmbedding>,
}

/// In-memory store; cheap to construct per test.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot_file_ids(state: &State, snapshot_id: Uuid) -> Vec<Uuid> {
        state
            .files
            .iter()
            .filter(|f| f.snapshot_id == snapshot_id)
            .map(|f| f.id)
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_product(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<Product> {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state.products.iter().find(|p| p.name == name) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
            created_at: now,
            updated_at: now,
        };
        state.products.push(product.clone());
        Ok(product)
    }

    async fn get_product_by_name(&self, name: &str) -> StoreResult<Option<Product>> {
        let state = self.state.read().unwrap();
        Ok(state.products.iter().find(|p| p.name == name).cloned())
    }

    async fn upsert_source(
        &self,
        product_id: Uuid,
        name: &str,
        source_type: SourceType,
        metadata: serde_json::Value,
    ) -> StoreResult<Source> {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state
            .sources
            .iter_mut()
            .find(|s| s.product_id == product_id && s.name == name)
        {
            existing.source_type = source_type;
            existing.metadata = metadata;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let source = Source {
            id: Uuid::new_v4(),
            product_id,
            name: name.to_string(),
            source_type,
            metadata,
            created_at: now,
            updated_at: now,
        };
        state.sources.push(source.clone());
        Ok(source)
    }

    async fn list_sources(&self, product_id: Uuid) -> StoreResult<Vec<Source>> {
        let state = self.state.read().unwrap();
        Ok(state
            .sources
            .iter()
            .filter(|s| s.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn create_snapshot(
        &self,
        source_id: Uuid,
        version: &str,
    ) -> StoreResult<SourceSnapshot> {
        let mut state = self.state.write().unwrap();
        if state
            .snapshots
            .iter()
            .any(|s| s.source_id == source_id && s.version == version)
        {
            return Err(StoreError::SnapshotVersionConflict {
                source_id,
                version: version.to_string(),
            });
        }
        let snapshot = SourceSnapshot {
            id: Uuid::new_v4(),
            source_id,
            version: version.to_string(),
            indexed: false,
            indexed_at: None,
            created_at: Utc::now(),
        };
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot(
        &self,
        source_id: Uuid,
        version: &str,
    ) -> StoreResult<Option<SourceSnapshot>> {
        let state = self.state.read().unwrap();
        Ok(state
            .snapshots
            .iter()
            .find(|s| s.source_id == source_id && s.version == version)
            .cloned())
    }

    async fn get_snapshot_by_id(&self, id: Uuid) -> StoreResult<Option<SourceSnapshot>> {
        let state = self.state.read().unwrap();
        Ok(state.snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn latest_indexed_snapshot(
        &self,
        source_id: Uuid,
    ) -> StoreResult<Option<SourceSnapshot>> {
        let state = self.state.read().unwrap();
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.source_id == source_id && s.indexed)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn list_snapshots(&self, source_id: Uuid) -> StoreResult<Vec<SourceSnapshot>> {
        let state = self.state.read().unwrap();
        let mut out: Vec<SourceSnapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.source_id == source_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn mark_snapshot_indexed(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let snapshot = state
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound { entity: "snapshot" })?;
        snapshot.indexed = true;
        snapshot.indexed_at = Some(Utc::now());
        Ok(())
    }

    async fn delete_snapshot(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let file_ids = Self::snapshot_file_ids(&state, id);
        state.files.retain(|f| f.snapshot_id != id);
        state.chunks.retain(|c| !file_ids.contains(&c.file_id));
        let chunk_ids: Vec<Uuid> = state
            .embeddings
            .iter()
            .map(|e| e.chunk_id)
            .filter(|cid| !state.chunks.iter().any(|c| c.id == *cid))
            .collect();
        state.embeddings.retain(|e| !chunk_ids.contains(&e.chunk_id));
        let summary_ids: Vec<Uuid> = state
            .summaries
            .iter()
            .filter(|s| s.snapshot_id == id)
            .map(|s| s.id)
            .collect();
        state.summaries.retain(|s| s.snapshot_id != id);
        for sid in summary_ids {
            state.summary_embeddings.remove(&sid);
        }
        state.snapshots.retain(|s| s.id != id);
        Ok(())
    }

    async fn create_file(&self, file: &FileRecord) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        if state
            .files
            .iter()
            .any(|f| f.snapshot_id == file.snapshot_id && f.path == file.path)
        {
            return Err(StoreError::backend(format!(
                "file already exists in snapshot: {}",
                file.path
            )));
        }
        state.files.push(file.clone());
        Ok(())
    }

    async fn list_files(&self, snapshot_id: Uuid) -> StoreResult<Vec<FileRecord>> {
        let state = self.state.read().unwrap();
        let mut files: Vec<FileRecord> = state
            .files
            .iter()
            .filter(|f| f.snapshot_id == snapshot_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn delete_files_by_paths(
        &self,
        snapshot_id: Uuid,
        paths: &[String],
    ) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let doomed: Vec<Uuid> = state
            .files
            .iter()
            .filter(|f| f.snapshot_id == snapshot_id && paths.contains(&f.path))
            .map(|f| f.id)
            .collect();
        state
            .files
            .retain(|f| !(f.snapshot_id == snapshot_id && paths.contains(&f.path)));
        state.chunks.retain(|c| !doomed.contains(&c.file_id));
        Ok(())
    }

    async fn file_hashes(&self, snapshot_id: Uuid) -> StoreResult<HashMap<String, String>> {
        let state = self.state.read().unwrap();
        Ok(state
            .files
            .iter()
            .filter(|f| f.snapshot_id == snapshot_id)
            .map(|f| (f.path.clone(), f.content_hash.clone()))
            .collect())
    }

    async fn batch_create_chunks(&self, chunks: &[Chunk]) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        // All-or-nothing: validate the whole batch before touching state.
        for chunk in chunks {
            if state
                .chunks
                .iter()
                .any(|c| c.file_id == chunk.file_id && c.ordinal == chunk.ordinal)
            {
                return Err(StoreError::backend(format!(
                    "duplicate ordinal {} for file {}",
                    chunk.ordinal, chunk.file_id
                )));
            }
        }
        state.chunks.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn list_chunks_by_file(&self, file_id: Uuid) -> StoreResult<Vec<Chunk>> {
        let state = self.state.read().unwrap();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    async fn list_chunks_by_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Vec<Chunk>> {
        let state = self.state.read().unwrap();
        let mut chunks: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|c| c.snapshot_id == snapshot_id)
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.chunk_key.cmp(&b.chunk_key));
        Ok(chunks)
    }

    async fn delete_chunks_by_file(&self, file_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let chunk_ids: Vec<Uuid> = state
            .chunks
            .iter()
            .filter(|c| c.file_id == file_id)
            .map(|c| c.id)
            .collect();
        state.chunks.retain(|c| c.file_id != file_id);
        state.embeddings.retain(|e| !chunk_ids.contains(&e.chunk_id));
        Ok(())
    }

    async fn get_chunk(&self, id: Uuid) -> StoreResult<Option<Chunk>> {
        let state = self.state.read().unwrap();
        Ok(state.chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn chunk_parent(&self, chunk: &Chunk) -> StoreResult<Option<Chunk>> {
        let Some(parent_name) = chunk.metadata.parent_name.as_deref() else {
            return Ok(None);
        };
        let state = self.state.read().unwrap();
        Ok(state
            .chunks
            .iter()
            .find(|c| {
                c.file_id == chunk.file_id
                    && c.metadata.level == crate::models::chunk_level::DECLARATION
                    && c.metadata.name.as_deref() == Some(parent_name)
            })
            .cloned())
    }

    async fn chunk_children(
        &self,
        file_id: Uuid,
        parent_name: &str,
    ) -> StoreResult<Vec<Chunk>> {
        let state = self.state.read().unwrap();
        let mut children: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|c| {
                c.file_id == file_id && c.metadata.parent_name.as_deref() == Some(parent_name)
            })
            .cloned()
            .collect();
        children.sort_by_key(|c| c.ordinal);
        Ok(children)
    }

    async fn create_embedding(&self, embedding: &Embedding) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        state
            .embeddings
            .retain(|e| !(e.chunk_id == embedding.chunk_id && e.model == embedding.model));
        state.embeddings.push(embedding.clone());
        Ok(())
    }

    async fn batch_create_embeddings(&self, embeddings: &[Embedding]) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        for embedding in embeddings {
            state
                .embeddings
                .retain(|e| !(e.chunk_id == embedding.chunk_id && e.model == embedding.model));
        }
        state.embeddings.extend(embeddings.iter().cloned());
        Ok(())
    }

    async fn count_embeddings(&self, snapshot_id: Uuid) -> StoreResult<u64> {
        let state = self.state.read().unwrap();
        let chunk_ids: Vec<Uuid> = state
            .chunks
            .iter()
            .filter(|c| c.snapshot_id == snapshot_id)
            .map(|c| c.id)
            .collect();
        Ok(state
            .embeddings
            .iter()
            .filter(|e| chunk_ids.contains(&e.chunk_id))
            .count() as u64)
    }

    async fn create_summary(&self, summary: &Summary) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        if state.summaries.iter().any(|s| {
            s.snapshot_id == summary.snapshot_id
                && s.summary_type == summary.summary_type
                && s.target_path == summary.target_path
                && s.arch_type == summary.arch_type
        }) {
            return Err(StoreError::backend("summary already exists"));
        }
        state.summaries.push(summary.clone());
        Ok(())
    }

    async fn update_summary(&self, summary: &Summary) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        let existing = state
            .summaries
            .iter_mut()
            .find(|s| s.id == summary.id)
            .ok_or(StoreError::NotFound { entity: "summary" })?;
        *existing = summary.clone();
        Ok(())
    }

    async fn get_summary(
        &self,
        snapshot_id: Uuid,
        summary_type: SummaryType,
        target_path: &str,
        arch_type: Option<ArchType>,
    ) -> StoreResult<Option<Summary>> {
        let state = self.state.read().unwrap();
        Ok(state
            .summaries
            .iter()
            .find(|s| {
                s.snapshot_id == snapshot_id
                    && s.summary_type == summary_type
                    && s.target_path == target_path
                    && s.arch_type == arch_type
            })
            .cloned())
    }

    async fn list_summaries(
        &self,
        snapshot_id: Uuid,
        summary_type: Option<SummaryType>,
    ) -> StoreResult<Vec<Summary>> {
        let state = self.state.read().unwrap();
        let mut out: Vec<Summary> = state
            .summaries
            .iter()
            .filter(|s| {
                s.snapshot_id == snapshot_id
                    && summary_type.map(|t| s.summary_type == t).unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.target_path.cmp(&b.target_path));
        Ok(out)
    }

    async fn upsert_summary_embedding(
        &self,
        embedding: &SummaryEmbedding,
    ) -> StoreResult<()> {
        let mut state = self.state.write().unwrap();
        state
            .summary_embeddings
            .insert(embedding.summary_id, embedding.clone());
        Ok(())
    }

    async fn get_summary_embedding(
        &self,
        summary_id: Uuid,
    ) -> StoreResult<Option<SummaryEmbedding>> {
        let state = self.state.read().unwrap();
        Ok(state.summary_embeddings.get(&summary_id).cloned())
    }

    async fn vector_search_chunks(
        &self,
        snapshot_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<ScoredChunk>> {
        let state = self.state.read().unwrap();
        let mut hits: Vec<ScoredChunk> = state
            .chunks
            .iter()
            .filter(|c| c.snapshot_id == snapshot_id)
            .filter_map(|c| {
                let embedding = state.embeddings.iter().find(|e| e.chunk_id == c.id)?;
                Some(ScoredChunk {
                    chunk: c.clone(),
                    score: score_similarity(query, &embedding.vector),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn vector_search_summaries(
        &self,
        snapshot_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<ScoredSummary>> {
        let state = self.state.read().unwrap();
        let mut hits: Vec<ScoredSummary> = state
            .summaries
            .iter()
            .filter(|s| s.snapshot_id == snapshot_id)
            .filter_map(|s| {
                let embedding = state.summary_embeddings.get(&s.id)?;
                Some(ScoredSummary {
                    summary: s.clone(),
                    score: score_similarity(query, &embedding.vector),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}
