//! Ingestion-service lifecycle: idempotent re-runs, conflict recovery,
//! and ignored-file filtering.

mod common;

use std::sync::Arc;

use common::{prose_doc, FakeEmbedder, StaticProvider};
use repolens::chunker::ChunkLimits;
use repolens::ingest::{IndexParams, IngestService};
use repolens::models::SourceType;
use repolens::pipeline::{IngestPipeline, PipelineConfig};
use repolens::store::memory::MemoryStore;
use repolens::store::Store;

fn service(store: Arc<MemoryStore>, provider: Arc<StaticProvider>) -> IngestService {
    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        FakeEmbedder::new(),
        ChunkLimits::default(),
        PipelineConfig::default(),
    ));
    IngestService::new(store, provider, pipeline)
}

fn params(force_init: bool) -> IndexParams {
    IndexParams {
        identifier: "https://example.com/acme/repo.git".to_string(),
        product_name: "acme".to_string(),
        reference: None,
        force_init,
    }
}

#[tokio::test]
async fn test_idempotent_rerun_returns_same_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let provider = StaticProvider::new(vec![prose_doc("a.txt", 3)], "c1");
    let svc = service(store.clone(), provider);

    let first = svc.index_source(params(false)).await.unwrap();
    assert!(first.processed_files > 0);

    let second = svc.index_source(params(false)).await.unwrap();
    assert_eq!(second.snapshot_id, first.snapshot_id);
    assert_eq!(second.version, first.version);
    assert_eq!(second.processed_files, 0);
    assert_eq!(second.total_chunks, 0);
}

#[tokio::test]
async fn test_conflict_recovery_resumes_unfinished_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let provider = StaticProvider::new(vec![prose_doc("a.txt", 3)], "c1");
    let svc = service(store.clone(), provider);

    // A previous run created the snapshot but never finished.
    let product = store.upsert_product("acme", None).await.unwrap();
    let source = store
        .upsert_source(product.id, "repo", SourceType::Git, serde_json::json!({}))
        .await
        .unwrap();
    let unfinished = store.create_snapshot(source.id, "c1").await.unwrap();
    assert!(!unfinished.indexed);

    let result = svc.index_source(params(false)).await.unwrap();
    assert_eq!(result.snapshot_id, unfinished.id);
    assert!(result.processed_files > 0);
    let row = store
        .get_snapshot_by_id(unfinished.id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.indexed);
}

#[tokio::test]
async fn test_new_version_creates_new_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let first = service(
        store.clone(),
        StaticProvider::new(vec![prose_doc("a.txt", 3)], "c1"),
    )
    .index_source(params(false))
    .await
    .unwrap();

    let second = service(
        store.clone(),
        StaticProvider::new(vec![prose_doc("a.txt", 3)], "c2"),
    )
    .index_source(params(false))
    .await
    .unwrap();

    assert_ne!(first.snapshot_id, second.snapshot_id);
    assert_eq!(second.version, "c2");
    assert!(second.processed_files > 0);
}

#[tokio::test]
async fn test_ignored_documents_never_surface() {
    let store = Arc::new(MemoryStore::new());
    let docs = vec![prose_doc("main.txt", 3), prose_doc("vendor/x.txt", 3)];
    let provider =
        StaticProvider::with_ignores(docs, "c1", vec!["vendor/".to_string()]);
    let svc = service(store.clone(), provider);

    let result = svc.index_source(params(false)).await.unwrap();
    assert_eq!(result.processed_files, 1);

    let files = store.list_files(result.snapshot_id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "main.txt");
}

#[tokio::test]
async fn test_force_init_reingests_indexed_version() {
    let store = Arc::new(MemoryStore::new());
    let provider = StaticProvider::new(vec![prose_doc("a.txt", 3)], "c1");
    let svc = service(store.clone(), provider);

    let first = svc.index_source(params(false)).await.unwrap();
    let second = svc.index_source(params(true)).await.unwrap();

    // Same version, but a fresh snapshot row with fresh rows beneath it.
    assert_ne!(second.snapshot_id, first.snapshot_id);
    assert!(second.processed_files > 0);
    assert!(store
        .get_snapshot_by_id(first.snapshot_id)
        .await
        .unwrap()
        .is_none());
}
