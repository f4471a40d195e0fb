//! External service ports: embedding, completion, and source providers.
//!
//! The core consumes these through narrow traits and never reads provider
//! credentials itself; the host constructs concrete clients and injects
//! them. OpenAI-backed implementations are provided for embeddings and
//! completions, with a shared retry policy for rate-limit-class errors:
//! exponential backoff starting at 2 s, doubling to a 32 s cap, at most
//! 3 retries. Non-retryable client errors propagate immediately. Every
//! provider call carries a 60 s deadline.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{SourceDocument, SourceType};

/// Default deadline for provider calls.
pub const PROVIDER_TIMEOUT_SECS: u64 = 60;
/// Retry cap for rate-limit-class errors.
pub const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 2;
const BACKOFF_CAP_SECS: u64 = 32;

/// Backoff before retry `attempt` (1-based): 2 s, 4 s, 8 s, … capped at 32 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    Duration::from_secs((BACKOFF_BASE_SECS << exp).min(BACKOFF_CAP_SECS))
}

/// Embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch; returns one vector per input, in order.
    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Largest batch the provider accepts. A non-positive value makes the
    /// pipeline fall back to batches of 1 with a warning.
    fn max_batch_size(&self) -> i32;
}

/// Completion backend used by the summary engine and the ask surface.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_completion(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Parameters of one fetch from a source provider.
#[derive(Debug, Clone)]
pub struct FetchParams {
    /// Provider-specific identifier, e.g. a repository URL.
    pub identifier: String,
    /// Optional ref (branch, tag, commit) to pin.
    pub reference: Option<String>,
}

/// Origin of ingestible documents.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Derive the source name from the identifier (e.g. repo name from URL).
    fn extract_source_name(&self, identifier: &str) -> String;

    /// Fetch all documents and the version identifier of the capture.
    async fn fetch_documents(
        &self,
        params: &FetchParams,
    ) -> Result<(Vec<SourceDocument>, String)>;

    /// Free-form metadata stored on the source row.
    fn create_metadata(&self, params: &FetchParams) -> serde_json::Value;

    /// Documents the pipeline should skip entirely.
    fn should_ignore(&self, doc: &SourceDocument) -> bool;
}

// ── OpenAI embeddings ───────────────────────────────────────────────────

/// Embedding client for the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    max_batch_size: i32,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimension: usize) -> Result<Self> {
        if api_key.is_empty() {
            bail!("embedding API key must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://api.openai.com".to_string(),
            model,
            dimension,
            max_batch_size: 2048,
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let resp = self
                .client
                .post(format!("{}/v1/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json, texts.len());
                    }
                    let text = response.text().await.unwrap_or_default();
                    // Rate limits and server errors are transient; retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "embedding request rate limited, backing off");
                        last_err = Some(anyhow::anyhow!("embedding API error {status}: {text}"));
                        continue;
                    }
                    bail!("embedding API error {status}: {text}");
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!(attempt, "embedding request timed out");
                    last_err = Some(e.into());
                    continue;
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

fn parse_embedding_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .context("embedding response missing data array")?;

    // Response order is not guaranteed; sort by index.
    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vector: Vec<f32> = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .context("embedding response missing embedding")?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    let vectors: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
    if vectors.len() != expected {
        tracing::warn!(
            expected,
            got = vectors.len(),
            "embedding response count differs from input"
        );
    }
    Ok(vectors)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.request(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .context("empty embedding response")
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> i32 {
        self.max_batch_size
    }
}

// ── OpenAI completions ──────────────────────────────────────────────────

/// Completion client for the OpenAI chat completions API.
pub struct OpenAiLlm {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiLlm {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self> {
        if api_key.is_empty() {
            bail!("LLM API key must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://api.openai.com".to_string(),
            model,
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiLlm {
    async fn generate_completion(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let resp = self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json["choices"][0]["message"]["content"]
                            .as_str()
                            .context("completion response missing content")?;
                        return Ok(content.to_string());
                    }
                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "completion request rate limited, backing off");
                        last_err = Some(anyhow::anyhow!("LLM API error {status}: {text}"));
                        continue;
                    }
                    bail!("LLM API error {status}: {text}");
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("completion failed after retries")))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── local provider ──────────────────────────────────────────────────────

/// Source provider over an already-checked-out directory tree. Useful for
/// local experiments and as the simplest provider implementation.
pub struct LocalProvider {
    ignore_globs: globset::GlobSet,
}

impl LocalProvider {
    pub fn new() -> Result<Self> {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in default_ignore_globs() {
            builder.add(globset::Glob::new(pattern)?);
        }
        Ok(Self {
            ignore_globs: builder.build()?,
        })
    }
}

/// Paths no provider should hand to the pipeline: vendored and generated
/// trees, dependency caches, VCS internals.
pub fn default_ignore_globs() -> &'static [&'static str] {
    &[
        "**/.git/**",
        "**/vendor/**",
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/*.min.js",
        "**/*.pb.go",
        "**/*_gen.go",
        "**/go.sum",
    ]
}

#[async_trait]
impl SourceProvider for LocalProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Local
    }

    fn extract_source_name(&self, identifier: &str) -> String {
        std::path::Path::new(identifier)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| identifier.to_string())
    }

    async fn fetch_documents(
        &self,
        params: &FetchParams,
    ) -> Result<(Vec<SourceDocument>, String)> {
        let root = std::path::Path::new(&params.identifier);
        if !root.is_dir() {
            bail!("local source '{}' is not a directory", params.identifier);
        }
        let mut docs = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable files are not ingestible
            };
            let mut doc = SourceDocument::new(rel, content);
            doc.updated_at = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            docs.push(doc);
        }
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        // Content-addressed version: the tree hash of all file hashes.
        let version = crate::models::source_hash_of(
            docs.iter().map(|d| d.content_hash.clone()).collect(),
        );
        Ok((docs, version))
    }

    fn create_metadata(&self, params: &FetchParams) -> serde_json::Value {
        serde_json::json!({ "root": params.identifier })
    }

    fn should_ignore(&self, doc: &SourceDocument) -> bool {
        self.ignore_globs.is_match(&doc.path)
    }
}
