//! Hybrid retrieval over chunk and summary embeddings.
//!
//! Embeds the query once, collects candidates from both the chunk and the
//! summary vector indexes, min-max normalizes each candidate set, and
//! merges with configurable weights. Serves the `ask` and `wiki` surfaces;
//! scores are normalized to `[0.0, 1.0]` and sorted descending.

use std::sync::Arc;

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::clients::Embedder;
use crate::graph::ChunkGraph;
use crate::store::{ScoredChunk, ScoredSummary, Store};

/// Share of a chunk's score that its graph centrality can add: heavily
/// referenced declarations rank slightly above leaf code at equal
/// similarity.
const CENTRALITY_BOOST: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Weight of chunk similarity in the merged score.
    pub chunk_weight: f64,
    /// Weight of summary similarity in the merged score.
    pub summary_weight: f64,
    /// Candidates fetched per index before merging.
    pub candidate_k: usize,
    /// Final result count.
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chunk_weight: 0.7,
            summary_weight: 0.3,
            candidate_k: 40,
            limit: 12,
        }
    }
}

/// Where a hit came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitKind {
    Chunk,
    Summary,
}

/// One merged search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub kind: HitKind,
    /// Chunk key for chunks; `type:path` label for summaries.
    pub reference: String,
    pub score: f64,
    pub snippet: String,
    pub content: String,
}

pub struct SearchEngine {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Hybrid search within one snapshot.
    pub async fn search(&self, snapshot_id: Uuid, query: &str) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let weights = self.config.chunk_weight + self.config.summary_weight;
        if weights <= 0.0 {
            bail!("search weights must sum to a positive value");
        }

        let query_vec = self.embedder.embed(query).await?;

        let chunk_hits = self
            .store
            .vector_search_chunks(snapshot_id, &query_vec, self.config.candidate_k)
            .await?;
        let summary_hits = self
            .store
            .vector_search_summaries(snapshot_id, &query_vec, self.config.candidate_k)
            .await?;

        // Dependency-graph centrality of the whole snapshot, used as a
        // small rank boost for heavily referenced chunks.
        let all_chunks = self.store.list_chunks_by_snapshot(snapshot_id).await?;
        let centrality = ChunkGraph::build(&all_chunks).centrality_scores();

        let mut merged = Vec::with_capacity(chunk_hits.len() + summary_hits.len());
        for (hit, norm) in normalize(&chunk_hits, |h: &ScoredChunk| h.score as f64) {
            let boost = centrality.get(&hit.chunk.id).copied().unwrap_or(0.0);
            merged.push(SearchHit {
                kind: HitKind::Chunk,
                reference: hit.chunk.chunk_key.clone(),
                score: norm * (1.0 + CENTRALITY_BOOST * boost) * self.config.chunk_weight
                    / weights,
                snippet: snippet_of(&hit.chunk.content),
                content: hit.chunk.content.clone(),
            });
        }
        for (hit, norm) in normalize(&summary_hits, |h: &ScoredSummary| h.score as f64) {
            let reference = format!(
                "{}:{}",
                hit.summary.summary_type.as_str(),
                if hit.summary.target_path.is_empty() {
                    hit.summary
                        .arch_type
                        .map(|a| a.as_str())
                        .unwrap_or("(root)")
                } else {
                    &hit.summary.target_path
                }
            );
            merged.push(SearchHit {
                kind: HitKind::Summary,
                reference,
                score: norm * self.config.summary_weight / weights,
                snippet: snippet_of(&hit.summary.content),
                content: hit.summary.content.clone(),
            });
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(self.config.limit);
        Ok(merged)
    }
}

/// Min-max normalization; a uniform candidate set maps to 1.0.
fn normalize<T>(candidates: &[T], score_of: impl Fn(&T) -> f64) -> Vec<(&T, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let s_min = candidates
        .iter()
        .map(&score_of)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(&score_of)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (score_of(c) - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

fn snippet_of(content: &str) -> String {
    content.chars().take(240).collect()
}
