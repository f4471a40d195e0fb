//! Pipeline behavior under load, failure, and misbehaving providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{prose_doc, FakeEmbedder};
use repolens::chunker::ChunkLimits;
use repolens::models::{DocContext, SourceDocument};
use repolens::pipeline::{IngestPipeline, PipelineConfig};
use repolens::store::memory::MemoryStore;
use repolens::store::Store;

fn ctx() -> DocContext {
    DocContext {
        product: "prod".to_string(),
        source: "src".to_string(),
        version: "v1".to_string(),
    }
}

fn no_ignore() -> Arc<dyn Fn(&SourceDocument) -> bool + Send + Sync> {
    Arc::new(|_| false)
}

fn pipeline(
    store: Arc<MemoryStore>,
    embedder: Arc<FakeEmbedder>,
    config: PipelineConfig,
) -> IngestPipeline {
    IngestPipeline::new(store, embedder, ChunkLimits::default(), config)
}

#[tokio::test]
async fn test_counts_are_deterministic_when_everything_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let embedder = FakeEmbedder::new();
    let pipe = pipeline(store.clone(), embedder, PipelineConfig::default());

    let docs: Vec<SourceDocument> = (0..6).map(|i| prose_doc(&format!("doc{i}.txt"), 3)).collect();
    let stats = pipe
        .process_documents(Uuid::new_v4(), docs, ctx(), no_ignore(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.processed_files, 6);
    assert_eq!(stats.failed_files, 0);
    assert_eq!(stats.failed_embeddings, 0);
    assert_eq!(stats.embedding_mismatches, 0);
    assert!(stats.expected_chunks > 0);
    assert_eq!(stats.total_chunks, stats.expected_chunks);
}

#[tokio::test]
async fn test_backpressure_with_tiny_channels() {
    // One worker per stage and an effective batch of 2: the chunk channel
    // capacity is 1 × 2, so chunk workers regularly block on a full
    // channel and the run still drains completely.
    let store = Arc::new(MemoryStore::new());
    let embedder = FakeEmbedder::with_max_batch(2);
    let config = PipelineConfig {
        chunk_workers: 1,
        embed_workers: 1,
        embed_batch_size: 64,
        fail_on_embedding_error: false,
    };
    let pipe = pipeline(store.clone(), embedder.clone(), config);

    let docs: Vec<SourceDocument> =
        (0..10).map(|i| prose_doc(&format!("doc{i}.txt"), 5)).collect();
    let stats = tokio::time::timeout(
        Duration::from_secs(30),
        pipe.process_documents(Uuid::new_v4(), docs, ctx(), no_ignore(), CancellationToken::new()),
    )
    .await
    .expect("bounded channels must not deadlock")
    .unwrap();

    assert_eq!(stats.processed_files, 10);
    assert_eq!(stats.total_chunks, stats.expected_chunks);
    // Every flush honored the clipped batch size.
    for size in embedder.batch_sizes() {
        assert!(size <= 2, "batch of {size} exceeds the effective batch size");
    }
}

#[tokio::test]
async fn test_soft_failure_counts_and_continues() {
    let store = Arc::new(MemoryStore::new());
    // Effective batch 2; exactly the first batch fails.
    let embedder = FakeEmbedder::failing_first(1);
    let config = PipelineConfig {
        chunk_workers: 1,
        embed_workers: 1,
        embed_batch_size: 2,
        fail_on_embedding_error: false,
    };
    let pipe = pipeline(store.clone(), embedder.clone(), config);

    let stats = pipe
        .process_documents(
            Uuid::new_v4(),
            vec![prose_doc("big.txt", 6)],
            ctx(),
            no_ignore(),
            CancellationToken::new(),
        )
        .await
        .expect("soft mode must not fail the run");

    let first_batch = embedder.batch_sizes()[0] as u64;
    assert_eq!(stats.failed_embeddings, first_batch);
    assert_eq!(stats.total_chunks, stats.expected_chunks - first_batch);
}

#[tokio::test]
async fn test_hard_failure_cancels_and_wraps_the_cause() {
    let store = Arc::new(MemoryStore::new());
    let embedder = FakeEmbedder::failing_first(i64::MAX);
    let config = PipelineConfig {
        chunk_workers: 2,
        embed_workers: 2,
        embed_batch_size: 2,
        fail_on_embedding_error: true,
    };
    let pipe = pipeline(store.clone(), embedder, config);

    let docs: Vec<SourceDocument> =
        (0..8).map(|i| prose_doc(&format!("doc{i}.txt"), 4)).collect();
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        pipe.process_documents(Uuid::new_v4(), docs, ctx(), no_ignore(), CancellationToken::new()),
    )
    .await
    .expect("hard failure must terminate promptly");

    let err = result.expect_err("hard mode surfaces the fatal error");
    let message = format!("{err:#}");
    assert!(message.contains("ingestion pipeline failed"), "{message}");
    assert!(message.contains("rate limited"), "{message}");
}

#[tokio::test]
async fn test_mismatch_is_counted_and_truncated() {
    let store = Arc::new(MemoryStore::new());
    // Every batch comes back one vector short.
    let embedder = FakeEmbedder::short_by(1);
    let config = PipelineConfig {
        chunk_workers: 1,
        embed_workers: 1,
        embed_batch_size: 64,
        fail_on_embedding_error: false,
    };
    let pipe = pipeline(store.clone(), embedder.clone(), config);

    let snapshot_id = Uuid::new_v4();
    let stats = pipe
        .process_documents(
            snapshot_id,
            vec![prose_doc("doc.txt", 4)],
            ctx(),
            no_ignore(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let batches = embedder.batch_sizes().len() as u64;
    assert_eq!(stats.embedding_mismatches, batches);
    assert_eq!(stats.failed_embeddings, batches);
    assert_eq!(stats.total_chunks, stats.expected_chunks - batches);
    // Only the truncated prefix was persisted.
    assert_eq!(
        store.count_embeddings(snapshot_id).await.unwrap(),
        stats.total_chunks
    );
}

#[tokio::test]
async fn test_non_positive_provider_batch_falls_back_to_one() {
    let store = Arc::new(MemoryStore::new());
    let embedder = FakeEmbedder::with_max_batch(0);
    let pipe = pipeline(store.clone(), embedder.clone(), PipelineConfig::default());

    let stats = pipe
        .process_documents(
            Uuid::new_v4(),
            vec![prose_doc("doc.txt", 3)],
            ctx(),
            no_ignore(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(stats.total_chunks, stats.expected_chunks);
    for size in embedder.batch_sizes() {
        assert_eq!(size, 1, "fallback batch size must be 1");
    }
}

#[tokio::test]
async fn test_caller_cancellation_stops_the_run() {
    let store = Arc::new(MemoryStore::new());
    let embedder = FakeEmbedder::new();
    let pipe = pipeline(store.clone(), embedder, PipelineConfig::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let docs: Vec<SourceDocument> =
        (0..4).map(|i| prose_doc(&format!("doc{i}.txt"), 3)).collect();
    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        pipe.process_documents(Uuid::new_v4(), docs, ctx(), no_ignore(), cancel),
    )
    .await
    .expect("cancelled run returns promptly")
    .unwrap();

    // Cancellation is not an error; whatever was processed is reported.
    assert!(stats.processed_files <= 4);
}
