//! Configuration parsing and validation.
//!
//! repolens is configured via a TOML file selected by environment name:
//! `config/<env>.toml` (default env: `dev`). The file defines the database
//! path, chunking token budgets, pipeline worker counts, provider models,
//! summary-engine tuning, and search weights. Provider API keys are never
//! stored in the file; the host reads them from the environment and passes
//! them to the client constructors.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::chunker::ChunkLimits;
use crate::pipeline::PipelineConfig;
use crate::search::SearchConfig;
use crate::summary::SummaryConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub summary: SummarySection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub git: GitSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let limits = ChunkLimits::default();
        Self {
            target_tokens: limits.target_tokens,
            max_tokens: limits.max_tokens,
            min_tokens: limits.min_tokens,
            overlap_tokens: limits.overlap_tokens,
        }
    }
}

impl ChunkingConfig {
    pub fn limits(&self) -> ChunkLimits {
        ChunkLimits {
            target_tokens: self.target_tokens,
            max_tokens: self.max_tokens,
            min_tokens: self.min_tokens,
            overlap_tokens: self.overlap_tokens,
            ..ChunkLimits::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSection {
    pub chunk_workers: usize,
    pub embed_workers: usize,
    pub embed_batch_size: usize,
    pub fail_on_embedding_error: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        let config = PipelineConfig::default();
        Self {
            chunk_workers: config.chunk_workers,
            embed_workers: config.embed_workers,
            embed_batch_size: config.embed_batch_size,
            fail_on_embedding_error: config.fail_on_embedding_error,
        }
    }
}

impl PipelineSection {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunk_workers: self.chunk_workers,
            embed_workers: self.embed_workers,
            embed_batch_size: self.embed_batch_size,
            fail_on_embedding_error: self.fail_on_embedding_error,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SummarySection {
    pub concurrency: usize,
    pub max_failure_ratio: f64,
}

impl Default for SummarySection {
    fn default() -> Self {
        let config = SummaryConfig::default();
        Self {
            concurrency: config.concurrency,
            max_failure_ratio: config.max_failure_ratio,
        }
    }
}

impl SummarySection {
    pub fn summary_config(&self) -> SummaryConfig {
        SummaryConfig {
            concurrency: self.concurrency,
            max_failure_ratio: self.max_failure_ratio,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchSection {
    pub chunk_weight: f64,
    pub summary_weight: f64,
    pub candidate_k: usize,
    pub limit: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        let config = SearchConfig::default();
        Self {
            chunk_weight: config.chunk_weight,
            summary_weight: config.summary_weight,
            candidate_k: config.candidate_k,
            limit: config.limit,
        }
    }
}

impl SearchSection {
    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            chunk_weight: self.chunk_weight,
            summary_weight: self.summary_weight,
            candidate_k: self.candidate_k,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GitSection {
    pub cache_dir: Option<PathBuf>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub shallow: Option<bool>,
}

/// Path of the config file for an environment name.
pub fn config_path(env: &str) -> PathBuf {
    PathBuf::from("config").join(format!("{env}.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("parsing config file {}", path.display()))?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.min_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be below chunking.max_tokens");
    }
    if config.chunking.target_tokens > config.chunking.max_tokens {
        anyhow::bail!("chunking.target_tokens must not exceed chunking.max_tokens");
    }
    if config.pipeline.chunk_workers == 0 || config.pipeline.embed_workers == 0 {
        anyhow::bail!("pipeline worker counts must be > 0");
    }
    if config.pipeline.embed_batch_size == 0 {
        anyhow::bail!("pipeline.embed_batch_size must be > 0");
    }
    if config.embedding.dimension == 0 {
        anyhow::bail!("embedding.dimension must be > 0");
    }
    if config.embedding.model.is_empty() || config.llm.model.is_empty() {
        anyhow::bail!("embedding.model and llm.model must be set");
    }
    if !(0.0..=1.0).contains(&config.summary.max_failure_ratio) {
        anyhow::bail!("summary.max_failure_ratio must be in [0.0, 1.0]");
    }
    if config.search.chunk_weight < 0.0 || config.search.summary_weight < 0.0 {
        anyhow::bail!("search weights must not be negative");
    }
    if config.search.chunk_weight + config.search.summary_weight <= 0.0 {
        anyhow::bail!("search weights must sum to a positive value");
    }

    Ok(config)
}
