//! Two-stage concurrent ingestion pipeline.
//!
//! ```text
//! producer ──▶ [doc channel] ──▶ chunk workers ──▶ [chunk channel] ──▶ embed workers
//!                  (≥ |docs|)       (default 4)      (workers × batch)    (default 8)
//! ```
//!
//! Documents stream through chunk workers (detect type, create the file
//! record, chunk, persist) into embedding workers (batch, embed, persist).
//! Bounded channels provide backpressure: chunk workers block when
//! embedding falls behind, the producer blocks when chunking falls behind.
//!
//! Failure model: a chunk-stage failure marks that one file failed and
//! never disturbs peers. Embedding failures depend on the configured mode:
//! soft counts them and the run still succeeds; hard stores the first
//! error in a one-shot slot, cancels the shared token, and every worker
//! returns promptly. Counters and the fatal slot are allocated per run and
//! do not outlive it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chunker::{ChunkLimits, ChunkerRegistry};
use crate::clients::Embedder;
use crate::content_type;
use crate::models::{
    chunk_key, content_hash, Chunk, DocContext, Embedding, FileRecord, SourceDocument,
};
use crate::store::Store;
use crate::tokenizer::TokenCounter;

/// Worker and batching configuration for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_workers: usize,
    pub embed_workers: usize,
    /// Requested embedding batch size; clipped by the provider's maximum.
    pub embed_batch_size: usize,
    /// Hard mode: the first embedding error or count mismatch cancels the
    /// run. Soft mode only counts failures.
    pub fail_on_embedding_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_workers: 4,
            embed_workers: 8,
            embed_batch_size: 64,
            fail_on_embedding_error: false,
        }
    }
}

/// `min(configured, provider max)`, with a fallback of 1 and a warning
/// when the provider reports a non-positive maximum.
pub fn effective_batch_size(configured: usize, provider_max: i32) -> usize {
    if provider_max <= 0 {
        tracing::warn!(
            provider_max,
            "embedding provider reported a non-positive max batch size, using 1"
        );
        return 1;
    }
    configured.min(provider_max as usize).max(1)
}

/// Observable outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Files that made it through chunking and chunk persistence.
    pub processed_files: u64,
    /// Chunks whose embeddings were persisted.
    pub total_chunks: u64,
    /// Chunks produced by the chunking stage.
    pub expected_chunks: u64,
    pub failed_files: u64,
    pub failed_chunks: u64,
    pub failed_embeddings: u64,
    pub embedding_mismatches: u64,
    pub ast_parse_failures: u64,
    pub high_comment_ratio_excluded: u64,
}

/// Per-file outcome published on the result channel.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: String,
    pub chunk_count: usize,
    pub error: Option<String>,
}

/// Per-run counters plus the one-shot fatal-error slot.
#[derive(Default)]
struct Counters {
    processed_files: AtomicU64,
    total_chunks: AtomicU64,
    expected_chunks: AtomicU64,
    failed_files: AtomicU64,
    failed_chunks: AtomicU64,
    failed_embeddings: AtomicU64,
    embedding_mismatches: AtomicU64,
    fatal: Mutex<Option<anyhow::Error>>,
}

impl Counters {
    fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Record the first fatal cause; later errors are dropped.
    fn set_fatal(&self, err: anyhow::Error) {
        let mut slot = self.fatal.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_fatal(&self) -> Option<anyhow::Error> {
        self.fatal.lock().unwrap().take()
    }
}

type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

pub struct IngestPipeline {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    limits: ChunkLimits,
    counter: TokenCounter,
    config: PipelineConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        limits: ChunkLimits,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            limits,
            counter: TokenCounter::default(),
            config,
        }
    }

    /// Process `documents` into persisted chunks and embeddings for
    /// `snapshot_id`. Returns the run statistics, or the first fatal error
    /// in hard mode.
    pub async fn process_documents(
        &self,
        snapshot_id: Uuid,
        documents: Vec<SourceDocument>,
        ctx: DocContext,
        should_ignore: Arc<dyn Fn(&SourceDocument) -> bool + Send + Sync>,
        parent_cancel: CancellationToken,
    ) -> Result<PipelineStats> {
        // Child token: a hard failure cancels this run without touching
        // the caller's token; caller cancellation still propagates down.
        let cancel = parent_cancel.child_token();
        let counters = Arc::new(Counters::default());
        // The module manifest, when the snapshot ships one, drives import
        // classification and dependency versions in chunk metadata.
        let manifest = documents
            .iter()
            .find(|d| d.path == "go.mod" || d.path.ends_with("/go.mod"))
            .map(|d| crate::chunker::deps::parse_go_mod(&d.content))
            .unwrap_or_default();
        let registry = Arc::new(
            ChunkerRegistry::new(self.limits.clone(), self.counter.clone())
                .with_manifest(manifest),
        );

        let effective_batch =
            effective_batch_size(self.config.embed_batch_size, self.embedder.max_batch_size());
        let input_capacity = documents.len().max(1);
        let chunk_capacity = (self.config.embed_workers * effective_batch).max(1);

        let (doc_tx, doc_rx) = mpsc::channel::<SourceDocument>(input_capacity);
        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(chunk_capacity);
        let (result_tx, mut result_rx) = mpsc::channel::<FileResult>(input_capacity);
        let doc_rx: SharedReceiver<SourceDocument> = Arc::new(tokio::sync::Mutex::new(doc_rx));
        let chunk_rx: SharedReceiver<Chunk> = Arc::new(tokio::sync::Mutex::new(chunk_rx));

        tracing::debug!(
            documents = documents.len(),
            chunk_workers = self.config.chunk_workers,
            embed_workers = self.config.embed_workers,
            effective_batch,
            "starting ingestion pipeline"
        );

        // Producer: filter ignorable documents, push the rest, close by drop.
        let producer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                for doc in documents {
                    if should_ignore(&doc) {
                        tracing::debug!(path = %doc.path, "skipping ignored document");
                        continue;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = doc_tx.send(doc) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            })
        };

        let mut chunk_handles = Vec::with_capacity(self.config.chunk_workers);
        for worker in 0..self.config.chunk_workers {
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&registry);
            let counters = Arc::clone(&counters);
            let doc_rx = Arc::clone(&doc_rx);
            let chunk_tx = chunk_tx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            let ctx = ctx.clone();
            chunk_handles.push(tokio::spawn(async move {
                chunk_worker(
                    worker, store, registry, counters, snapshot_id, ctx, doc_rx, chunk_tx,
                    result_tx, cancel,
                )
                .await;
            }));
        }
        // Workers hold the only senders; the chunk channel closes when the
        // last worker finishes.
        drop(chunk_tx);
        drop(result_tx);

        let mut embed_handles = Vec::with_capacity(self.config.embed_workers);
        for worker in 0..self.config.embed_workers {
            let store = Arc::clone(&self.store);
            let embedder = Arc::clone(&self.embedder);
            let counters = Arc::clone(&counters);
            let chunk_rx = Arc::clone(&chunk_rx);
            let cancel = cancel.clone();
            let fail_hard = self.config.fail_on_embedding_error;
            embed_handles.push(tokio::spawn(async move {
                embed_worker(
                    worker,
                    store,
                    embedder,
                    counters,
                    chunk_rx,
                    cancel,
                    effective_batch,
                    fail_hard,
                )
                .await;
            }));
        }

        // Drain per-file results for observability.
        let collector = tokio::spawn(async move {
            while let Some(result) = result_rx.recv().await {
                match result.error {
                    Some(error) => {
                        tracing::warn!(path = %result.path, %error, "document failed")
                    }
                    None => tracing::debug!(
                        path = %result.path,
                        chunks = result.chunk_count,
                        "document chunked"
                    ),
                }
            }
        });

        // Coordinator: join every stage, closing channels exactly once via
        // sender drops above.
        let _ = producer.await;
        for handle in chunk_handles {
            let _ = handle.await;
        }
        for handle in embed_handles {
            let _ = handle.await;
        }
        let _ = collector.await;

        let metrics = registry.metrics();
        let stats = PipelineStats {
            processed_files: counters.processed_files.load(Ordering::Relaxed),
            total_chunks: counters.total_chunks.load(Ordering::Relaxed),
            expected_chunks: counters.expected_chunks.load(Ordering::Relaxed),
            failed_files: counters.failed_files.load(Ordering::Relaxed),
            failed_chunks: counters.failed_chunks.load(Ordering::Relaxed),
            failed_embeddings: counters.failed_embeddings.load(Ordering::Relaxed),
            embedding_mismatches: counters.embedding_mismatches.load(Ordering::Relaxed),
            ast_parse_failures: metrics.parse_failures(),
            high_comment_ratio_excluded: metrics.comment_ratio_drops(),
        };

        if let Some(fatal) = counters.take_fatal() {
            tracing::error!(error = %fatal, "pipeline aborted");
            return Err(fatal.context("ingestion pipeline failed"));
        }

        tracing::info!(
            processed_files = stats.processed_files,
            total_chunks = stats.total_chunks,
            failed_files = stats.failed_files,
            "pipeline finished"
        );
        Ok(stats)
    }
}

#[allow(clippy::too_many_arguments)]
async fn chunk_worker(
    worker: usize,
    store: Arc<dyn Store>,
    registry: Arc<ChunkerRegistry>,
    counters: Arc<Counters>,
    snapshot_id: Uuid,
    ctx: DocContext,
    doc_rx: SharedReceiver<SourceDocument>,
    chunk_tx: mpsc::Sender<Chunk>,
    result_tx: mpsc::Sender<FileResult>,
    cancel: CancellationToken,
) {
    loop {
        let doc = {
            let mut rx = doc_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                doc = rx.recv() => doc,
            }
        };
        let Some(doc) = doc else {
            tracing::debug!(worker, "chunk worker done");
            return;
        };

        let path = doc.path.clone();
        match process_document(&store, &registry, &counters, snapshot_id, &ctx, doc).await {
            Ok(chunks) => {
                counters.add(&counters.processed_files, 1);
                let chunk_count = chunks.len();
                for chunk in chunks {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = chunk_tx.send(chunk) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
                let _ = result_tx.try_send(FileResult {
                    path,
                    chunk_count,
                    error: None,
                });
            }
            Err(error) => {
                // One bad document never disturbs its peers.
                counters.add(&counters.failed_files, 1);
                let _ = result_tx.try_send(FileResult {
                    path,
                    chunk_count: 0,
                    error: Some(error.to_string()),
                });
            }
        }
    }
}

/// Detect, record, chunk, and persist one document. Returns the
/// materialized chunks ready for the embedding stage.
async fn process_document(
    store: &Arc<dyn Store>,
    registry: &ChunkerRegistry,
    counters: &Counters,
    snapshot_id: Uuid,
    ctx: &DocContext,
    doc: SourceDocument,
) -> Result<Vec<Chunk>> {
    let detected = content_type::detect(&doc.path, doc.content.as_bytes());
    let language = content_type::language_for(detected).map(|l| l.to_string());
    let domain = Some(content_type::classify_domain(&doc.path));

    let file = FileRecord {
        id: Uuid::new_v4(),
        snapshot_id,
        path: doc.path.clone(),
        size: doc.size,
        content_type: detected.to_string(),
        content_hash: doc.content_hash.clone(),
        language,
        domain,
    };
    store
        .create_file(&file)
        .await
        .map_err(|e| anyhow::anyhow!("creating file record for {}: {e}", doc.path))?;

    let chunker = registry.for_content_type(detected);
    let mut results = chunker.chunk(&doc.path, &doc.content)?;
    // Ordinals are dense and follow reading order.
    results.sort_by_key(|r| (r.start_line, r.end_line));

    let chunks: Vec<Chunk> = results
        .into_iter()
        .enumerate()
        .map(|(ordinal, result)| {
            let ordinal = ordinal as i64;
            let key = chunk_key(
                &ctx.product,
                &ctx.source,
                &doc.path,
                result.start_line,
                result.end_line,
                ordinal,
                &ctx.version,
            );
            Chunk {
                id: Uuid::new_v4(),
                file_id: file.id,
                ordinal,
                start_line: result.start_line,
                end_line: result.end_line,
                content_hash: content_hash(result.content.as_bytes()),
                content: result.content,
                token_count: result.token_count,
                metadata: result.metadata,
                snapshot_id,
                commit_hash: doc.commit_hash.clone(),
                author: doc.author.clone(),
                updated_at: doc.updated_at,
                is_latest: true,
                chunk_key: key,
            }
        })
        .collect();

    counters.add(&counters.expected_chunks, chunks.len() as u64);

    if let Err(e) = store.batch_create_chunks(&chunks).await {
        counters.add(&counters.failed_chunks, chunks.len() as u64);
        return Err(anyhow::anyhow!("persisting chunks for {}: {e}", doc.path));
    }
    Ok(chunks)
}

#[allow(clippy::too_many_arguments)]
async fn embed_worker(
    worker: usize,
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    counters: Arc<Counters>,
    chunk_rx: SharedReceiver<Chunk>,
    cancel: CancellationToken,
    effective_batch: usize,
    fail_hard: bool,
) {
    let mut batch: Vec<Chunk> = Vec::with_capacity(effective_batch);
    loop {
        let chunk = {
            let mut rx = chunk_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = rx.recv() => chunk,
            }
        };
        match chunk {
            Some(chunk) => {
                batch.push(chunk);
                if batch.len() >= effective_batch {
                    flush_batch(
                        &store, &embedder, &counters, &cancel, &mut batch, fail_hard,
                    )
                    .await;
                }
            }
            None => {
                // Channel closed: flush the residual batch and exit.
                flush_batch(&store, &embedder, &counters, &cancel, &mut batch, fail_hard).await;
                tracing::debug!(worker, "embed worker done");
                return;
            }
        }
    }
}

async fn flush_batch(
    store: &Arc<dyn Store>,
    embedder: &Arc<dyn Embedder>,
    counters: &Counters,
    cancel: &CancellationToken,
    batch: &mut Vec<Chunk>,
    fail_hard: bool,
) {
    if batch.is_empty() {
        return;
    }
    let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

    let vectors = match embedder.batch_embed(&texts).await {
        Ok(vectors) => vectors,
        Err(e) => {
            counters.add(&counters.failed_embeddings, batch.len() as u64);
            if fail_hard {
                counters.set_fatal(e.context("batch embedding failed"));
                cancel.cancel();
            } else {
                tracing::warn!(batch = batch.len(), error = %e, "embedding batch failed");
            }
            batch.clear();
            return;
        }
    };

    if vectors.len() != batch.len() {
        let missing = batch.len().abs_diff(vectors.len()) as u64;
        counters.add(&counters.embedding_mismatches, 1);
        counters.add(&counters.failed_embeddings, missing);
        tracing::warn!(
            expected = batch.len(),
            got = vectors.len(),
            "embedding count mismatch, truncating"
        );
        if fail_hard {
            counters.set_fatal(anyhow::anyhow!(
                "embedding count mismatch: expected {}, got {}",
                batch.len(),
                vectors.len()
            ));
            cancel.cancel();
        }
    }

    let persisted = vectors.len().min(batch.len());
    let now = Utc::now();
    let embeddings: Vec<Embedding> = batch
        .iter()
        .zip(vectors.into_iter())
        .take(persisted)
        .map(|(chunk, vector)| Embedding {
            chunk_id: chunk.id,
            vector,
            model: embedder.model_name().to_string(),
            created_at: now,
        })
        .collect();

    match store.batch_create_embeddings(&embeddings).await {
        Ok(()) => counters.add(&counters.total_chunks, persisted as u64),
        Err(e) => {
            counters.add(&counters.failed_embeddings, persisted as u64);
            if fail_hard {
                counters.set_fatal(anyhow::anyhow!("persisting embeddings: {e}"));
                cancel.cancel();
            } else {
                tracing::warn!(error = %e, "persisting embeddings failed");
            }
        }
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;

    struct UnitEmbedder {
        max_batch: i32,
    }

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn model_name(&self) -> &str {
            "unit-embedder"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn max_batch_size(&self) -> i32 {
            self.max_batch
        }
    }

    fn doc_ctx() -> DocContext {
        DocContext {
            product: "prod".to_string(),
            source: "src".to_string(),
            version: "v1".to_string(),
        }
    }

    fn prose_doc(path: &str, lines: usize) -> SourceDocument {
        let content = (0..lines)
            .map(|i| format!("Line {i} of {path} with enough words to carry some tokens along."))
            .collect::<Vec<_>>()
            .join("\n");
        SourceDocument::new(path, content)
    }

    #[test]
    fn test_effective_batch_size_clipping() {
        assert_eq!(effective_batch_size(64, 32), 32);
        assert_eq!(effective_batch_size(16, 32), 16);
        assert_eq!(effective_batch_size(64, 0), 1);
        assert_eq!(effective_batch_size(64, -5), 1);
    }

    #[tokio::test]
    async fn test_all_documents_flow_through() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(UnitEmbedder { max_batch: 8 }),
            ChunkLimits::default(),
            PipelineConfig::default(),
        );
        let docs = vec![prose_doc("a.txt", 200), prose_doc("b.txt", 200)];
        let stats = pipeline
            .process_documents(
                Uuid::new_v4(),
                docs,
                doc_ctx(),
                Arc::new(|_: &SourceDocument| false),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(stats.processed_files, 2);
        assert_eq!(stats.failed_files, 0);
        assert!(stats.expected_chunks > 0);
        assert_eq!(stats.total_chunks, stats.expected_chunks);
    }

    #[tokio::test]
    async fn test_ignored_documents_filtered_at_the_producer() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(UnitEmbedder { max_batch: 8 }),
            ChunkLimits::default(),
            PipelineConfig::default(),
        );
        let docs = vec![prose_doc("keep.txt", 200), prose_doc("vendor/skip.txt", 200)];
        let stats = pipeline
            .process_documents(
                Uuid::new_v4(),
                docs,
                doc_ctx(),
                Arc::new(|d: &SourceDocument| d.path.starts_with("vendor/")),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(stats.processed_files, 1);
    }

    #[tokio::test]
    async fn test_chunk_keys_and_ordinals() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(UnitEmbedder { max_batch: 8 }),
            ChunkLimits::default(),
            PipelineConfig::default(),
        );
        let snapshot_id = Uuid::new_v4();
        pipeline
            .process_documents(
                snapshot_id,
                vec![prose_doc("doc.txt", 600)],
                doc_ctx(),
                Arc::new(|_: &SourceDocument| false),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let files = store.list_files(snapshot_id).await.unwrap();
        assert_eq!(files.len(), 1);
        let chunks = store.list_chunks_by_file(files[0].id).await.unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as i64);
            let expected_key = chunk_key(
                "prod",
                "src",
                "doc.txt",
                chunk.start_line,
                chunk.end_line,
                chunk.ordinal,
                "v1",
            );
            assert_eq!(chunk.chunk_key, expected_key);
        }
        // Start lines follow reading order.
        for pair in chunks.windows(2) {
            assert!(pair[0].start_line <= pair[1].start_line);
        }
    }
}
