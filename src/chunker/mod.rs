//! Chunking strategies and their shared contract.
//!
//! A [`Chunker`] turns `(path, content)` into a list of
//! [`ChunkResult`](crate::models::ChunkResult)s. The strategy is selected by
//! content type:
//!
//! | Content type | Strategy |
//! |--------------|----------|
//! | `text/x-go` | [`code::GoAstChunker`] — AST declarations + logic blocks |
//! | `text/markdown` | [`markup::MarkupChunker`] — heading sections |
//! | everything else | [`text::LineChunker`] — token-budgeted line windows |
//!
//! All strategies enforce the same token-range filters and report drops
//! through the shared [`ChunkMetrics`] counters.

pub mod code;
pub mod deps;
pub mod markup;
pub mod text;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::models::ChunkResult;
use crate::tokenizer::TokenCounter;

/// Token budgets applied by every chunking strategy.
#[derive(Debug, Clone)]
pub struct ChunkLimits {
    /// Emission threshold for the line-based path.
    pub target_tokens: usize,
    /// Upper bound for any chunk.
    pub max_tokens: usize,
    /// Lower bound for plain-text and markup chunks.
    pub min_tokens: usize,
    /// Lower bound for AST declaration and logic-block chunks.
    pub ast_min_tokens: usize,
    /// Lower bound for type declarations (structs, interfaces, aliases).
    pub ast_type_min_tokens: usize,
    /// Overlap carried between consecutive line-based chunks.
    pub overlap_tokens: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            max_tokens: 1600,
            min_tokens: 100,
            ast_min_tokens: 10,
            ast_type_min_tokens: 5,
            overlap_tokens: 200,
        }
    }
}

/// Data-quality counters shared across chunker instances for one pipeline
/// run. None of these surface as errors; they are observability only.
#[derive(Debug, Default)]
pub struct ChunkMetrics {
    pub ast_parse_failures: AtomicU64,
    pub high_comment_ratio_excluded: AtomicU64,
    pub token_range_excluded: AtomicU64,
}

impl ChunkMetrics {
    pub fn record_parse_failure(&self) {
        self.ast_parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_comment_ratio_drop(&self) {
        self.high_comment_ratio_excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_range_drop(&self) {
        self.token_range_excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_failures(&self) -> u64 {
        self.ast_parse_failures.load(Ordering::Relaxed)
    }

    pub fn comment_ratio_drops(&self) -> u64 {
        self.high_comment_ratio_excluded.load(Ordering::Relaxed)
    }

    pub fn token_range_drops(&self) -> u64 {
        self.token_range_excluded.load(Ordering::Relaxed)
    }
}

/// A chunking strategy. Implementations guarantee 1-based inclusive line
/// spans, non-null metadata, and token counts within the configured range.
pub trait Chunker: Send + Sync {
    fn chunk(&self, path: &str, content: &str) -> Result<Vec<ChunkResult>>;
}

/// Resolves a [`Chunker`] per content type, sharing limits, tokenizer, and
/// metrics across all strategies.
pub struct ChunkerRegistry {
    limits: ChunkLimits,
    counter: TokenCounter,
    metrics: Arc<ChunkMetrics>,
    analyzer: deps::DependencyAnalyzer,
}

impl ChunkerRegistry {
    pub fn new(limits: ChunkLimits, counter: TokenCounter) -> Self {
        Self {
            limits,
            counter,
            metrics: Arc::new(ChunkMetrics::default()),
            analyzer: deps::DependencyAnalyzer::default(),
        }
    }

    /// Use the module manifest for import classification and versions.
    pub fn with_manifest(mut self, manifest: deps::ModuleManifest) -> Self {
        self.analyzer = deps::DependencyAnalyzer::new(manifest);
        self
    }

    pub fn limits(&self) -> &ChunkLimits {
        &self.limits
    }

    pub fn metrics(&self) -> Arc<ChunkMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Select the chunking strategy for a content type.
    pub fn for_content_type(&self, content_type: &str) -> Box<dyn Chunker> {
        match content_type {
            crate::content_type::GO => Box::new(
                code::GoAstChunker::new(
                    self.limits.clone(),
                    self.counter.clone(),
                    Arc::clone(&self.metrics),
                )
                .with_analyzer(self.analyzer.clone()),
            ),
            crate::content_type::MARKDOWN => Box::new(markup::MarkupChunker::new(
                self.limits.clone(),
                self.counter.clone(),
                Arc::clone(&self.metrics),
            )),
            _ => Box::new(text::LineChunker::new(
                self.limits.clone(),
                self.counter.clone(),
                Arc::clone(&self.metrics),
            )),
        }
    }
}

impl Default for ChunkerRegistry {
    fn default() -> Self {
        Self::new(ChunkLimits::default(), TokenCounter::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_selects_by_content_type() {
        let registry = ChunkerRegistry::default();
        // Each content type resolves without panicking; behavior of the
        // strategies is covered by their own test modules.
        registry.for_content_type(crate::content_type::GO);
        registry.for_content_type(crate::content_type::MARKDOWN);
        registry.for_content_type(crate::content_type::PLAIN);
        registry.for_content_type("application/json");
    }

    #[test]
    fn test_metrics_shared_across_strategies() {
        let registry = ChunkerRegistry::default();
        registry.metrics().record_parse_failure();
        assert_eq!(registry.metrics().parse_failures(), 1);
    }

    #[test]
    fn test_default_limits() {
        let limits = ChunkLimits::default();
        assert_eq!(limits.target_tokens, 800);
        assert_eq!(limits.max_tokens, 1600);
        assert_eq!(limits.min_tokens, 100);
        assert_eq!(limits.ast_min_tokens, 10);
        assert_eq!(limits.ast_type_min_tokens, 5);
        assert_eq!(limits.overlap_tokens, 200);
    }
}
