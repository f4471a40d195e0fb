//! Shared test doubles for the integration suites: a scriptable embedder,
//! a counting LLM, and a static source provider.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use repolens::clients::{Embedder, FetchParams, LlmClient, SourceProvider};
use repolens::models::{content_hash, SourceDocument, SourceType};

/// Embedder with scriptable failures: fail the first N batches, return
/// short batches, or cap the provider batch size. Records every batch it
/// was asked to embed.
pub struct FakeEmbedder {
    pub dimension: usize,
    max_batch: i64,
    fail_first_batches: AtomicI64,
    short_by: usize,
    batch_sizes: Mutex<Vec<usize>>,
    calls: AtomicU64,
}

impl FakeEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dimension: 4,
            max_batch: 64,
            fail_first_batches: AtomicI64::new(0),
            short_by: 0,
            batch_sizes: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        })
    }

    pub fn with_max_batch(max_batch: i64) -> Arc<Self> {
        Arc::new(Self {
            max_batch,
            ..Self::unwrapped()
        })
    }

    pub fn failing_first(batches: i64) -> Arc<Self> {
        Arc::new(Self {
            fail_first_batches: AtomicI64::new(batches),
            ..Self::unwrapped()
        })
    }

    pub fn short_by(short_by: usize) -> Arc<Self> {
        Arc::new(Self {
            short_by,
            ..Self::unwrapped()
        })
    }

    fn unwrapped() -> Self {
        Self {
            dimension: 4,
            max_batch: 64,
            fail_first_batches: AtomicI64::new(0),
            short_by: 0,
            batch_sizes: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    /// Deterministic unit-ish vector derived from the text.
    fn vector_for(&self, text: &str) -> Vec<f32> {
        let hash = content_hash(text.as_bytes());
        hash.as_bytes()
            .iter()
            .take(self.dimension)
            .map(|b| *b as f32 / 255.0)
            .collect()
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.vector_for(text))
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.batch_sizes.lock().unwrap().push(texts.len());
        if self.fail_first_batches.fetch_sub(1, Ordering::SeqCst) > 0 {
            bail!("rate limited (simulated)");
        }
        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        vectors.truncate(texts.len().saturating_sub(self.short_by));
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        "fake-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> i32 {
        self.max_batch as i32
    }
}

/// LLM returning deterministic text per prompt, counting calls.
pub struct FakeLlm {
    calls: AtomicU64,
}

impl FakeLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    async fn generate_completion(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(format!("summary:{}", &content_hash(prompt.as_bytes())[..16]))
    }

    fn model_name(&self) -> &str {
        "fake-llm"
    }
}

/// Provider serving a fixed document set and version, ignoring configured
/// path prefixes.
pub struct StaticProvider {
    pub docs: Vec<SourceDocument>,
    pub version: String,
    pub ignore_prefixes: Vec<String>,
}

impl StaticProvider {
    pub fn new(docs: Vec<SourceDocument>, version: &str) -> Arc<Self> {
        Arc::new(Self {
            docs,
            version: version.to_string(),
            ignore_prefixes: Vec::new(),
        })
    }

    pub fn with_ignores(
        docs: Vec<SourceDocument>,
        version: &str,
        ignore_prefixes: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            docs,
            version: version.to_string(),
            ignore_prefixes,
        })
    }
}

#[async_trait]
impl SourceProvider for StaticProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Git
    }

    fn extract_source_name(&self, _identifier: &str) -> String {
        "repo".to_string()
    }

    async fn fetch_documents(
        &self,
        _params: &FetchParams,
    ) -> Result<(Vec<SourceDocument>, String)> {
        Ok((self.docs.clone(), self.version.clone()))
    }

    fn create_metadata(&self, params: &FetchParams) -> serde_json::Value {
        serde_json::json!({ "url": params.identifier })
    }

    fn should_ignore(&self, doc: &SourceDocument) -> bool {
        self.ignore_prefixes
            .iter()
            .any(|prefix| doc.path.starts_with(prefix))
    }
}

/// A Go document whose commit metadata is filled in.
pub fn go_doc(path: &str, content: &str, commit: &str) -> SourceDocument {
    let mut doc = SourceDocument::new(path, content);
    doc.commit_hash = Some(commit.to_string());
    doc.author = Some("dev".to_string());
    doc
}

/// Plain-prose document producing roughly `chunks` chunks with the
/// default 800-token target.
pub fn prose_doc(path: &str, chunks: usize) -> SourceDocument {
    let lines_per_chunk = 80; // ~10 tokens per line
    let content = (0..chunks * lines_per_chunk)
        .map(|i| format!("Line {i} of {path} filled with plain prose tokens for testing."))
        .collect::<Vec<_>>()
        .join("\n");
    SourceDocument::new(path, content)
}
