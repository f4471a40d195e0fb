//! Ingestion service: drives one indexing invocation end to end.
//!
//! Upserts the product and source, fetches documents from the provider,
//! resolves the snapshot for the fetched version (reusing an existing one
//! on conflict), runs the pipeline, and finalizes by marking the snapshot
//! indexed. A failed run leaves the snapshot `indexed = false`, so the
//! next invocation resumes on the same row instead of starting over.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clients::{FetchParams, SourceProvider};
use crate::models::{DocContext, SourceDocument};
use crate::pipeline::IngestPipeline;
use crate::store::{Store, StoreError};

/// Parameters of one indexing invocation.
#[derive(Debug, Clone)]
pub struct IndexParams {
    /// Provider-specific identifier, e.g. a repository URL.
    pub identifier: String,
    pub product_name: String,
    /// Optional ref to pin (branch, tag, commit).
    pub reference: Option<String>,
    /// Discard an existing indexed snapshot of the same version and
    /// ingest from scratch.
    pub force_init: bool,
}

/// Outcome of one indexing invocation.
#[derive(Debug, Clone)]
pub struct IndexResult {
    pub snapshot_id: Uuid,
    pub version: String,
    pub processed_files: u64,
    pub total_chunks: u64,
    pub duration: Duration,
}

pub struct IngestService {
    store: Arc<dyn Store>,
    provider: Arc<dyn SourceProvider>,
    pipeline: Arc<IngestPipeline>,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn SourceProvider>,
        pipeline: Arc<IngestPipeline>,
    ) -> Self {
        Self {
            store,
            provider,
            pipeline,
        }
    }

    pub async fn index_source(&self, params: IndexParams) -> Result<IndexResult> {
        if params.identifier.trim().is_empty() {
            bail!("source identifier must not be empty");
        }
        if params.product_name.trim().is_empty() {
            bail!("product name must not be empty");
        }
        let started = Instant::now();

        let product = self
            .store
            .upsert_product(&params.product_name, None)
            .await
            .context("upserting product")?;

        let fetch = FetchParams {
            identifier: params.identifier.clone(),
            reference: params.reference.clone(),
        };
        let source_name = self.provider.extract_source_name(&params.identifier);
        let source = self
            .store
            .upsert_source(
                product.id,
                &source_name,
                self.provider.source_type(),
                self.provider.create_metadata(&fetch),
            )
            .await
            .context("upserting source")?;

        let (documents, version) = self
            .provider
            .fetch_documents(&fetch)
            .await
            .context("fetching documents")?;
        tracing::info!(
            product = %product.name,
            source = %source.name,
            %version,
            documents = documents.len(),
            "fetched source documents"
        );

        // Same version already fully indexed: nothing to do.
        if !params.force_init {
            if let Some(existing) = self.store.get_snapshot(source.id, &version).await? {
                if existing.indexed {
                    tracing::info!(snapshot = %existing.id, "snapshot already indexed, reusing");
                    return Ok(IndexResult {
                        snapshot_id: existing.id,
                        version,
                        processed_files: 0,
                        total_chunks: 0,
                        duration: started.elapsed(),
                    });
                }
            }
        }

        let mut resumed = false;
        let snapshot = match self.store.create_snapshot(source.id, &version).await {
            Ok(snapshot) => snapshot,
            Err(StoreError::SnapshotVersionConflict { .. }) => {
                // Lost the race or a prior run already created the row.
                let existing = self
                    .store
                    .get_snapshot(source.id, &version)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!("snapshot conflicted but cannot be reloaded")
                    })?;
                if existing.indexed {
                    if params.force_init {
                        // Re-ingest from scratch: drop the old capture and
                        // everything it owns.
                        tracing::warn!(snapshot = %existing.id, "discarding indexed snapshot");
                        self.store.delete_snapshot(existing.id).await?;
                        self.store.create_snapshot(source.id, &version).await?
                    } else {
                        return Ok(IndexResult {
                            snapshot_id: existing.id,
                            version,
                            processed_files: 0,
                            total_chunks: 0,
                            duration: started.elapsed(),
                        });
                    }
                } else {
                    // Partial ingestion from an earlier failed run; resume
                    // onto the same row.
                    tracing::info!(snapshot = %existing.id, "resuming unfinished snapshot");
                    resumed = true;
                    existing
                }
            }
            Err(e) => return Err(e).context("creating snapshot"),
        };

        if resumed {
            // Clear rows left by the failed run so reprocessing does not
            // collide with the (snapshot, path) constraint.
            let paths: Vec<String> = documents.iter().map(|d| d.path.clone()).collect();
            self.store.delete_files_by_paths(snapshot.id, &paths).await?;
        }

        let ctx = DocContext {
            product: product.name.clone(),
            source: source.name.clone(),
            version: version.clone(),
        };
        let provider = Arc::clone(&self.provider);
        let should_ignore: Arc<dyn Fn(&SourceDocument) -> bool + Send + Sync> =
            Arc::new(move |doc| provider.should_ignore(doc));

        let stats = self
            .pipeline
            .process_documents(
                snapshot.id,
                documents,
                ctx,
                should_ignore,
                CancellationToken::new(),
            )
            .await
            .context("running ingestion pipeline")?;
        // Only a complete run flips the flag; failures above leave the
        // snapshot resumable.
        self.store.mark_snapshot_indexed(snapshot.id).await?;

        Ok(IndexResult {
            snapshot_id: snapshot.id,
            version,
            processed_files: stats.processed_files,
            total_chunks: stats.total_chunks,
            duration: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkLimits;
    use crate::clients::Embedder;
    use crate::models::SourceType;
    use crate::pipeline::PipelineConfig;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;

    struct UnitEmbedder;

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
            8
        }
    }

    struct FixedProvider {
        version: String,
    }

    #[async_trait]
    impl SourceProvider for FixedProvider {
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
            let content = (0..200)
                .map(|i| format!("Line {i} of prose with several useful tokens in it."))
                .collect::<Vec<_>>()
                .join("\n");
            Ok((
                vec![SourceDocument::new("notes.txt", content)],
                self.version.clone(),
            ))
        }
        fn create_metadata(&self, params: &FetchParams) -> serde_json::Value {
            serde_json::json!({ "url": params.identifier })
        }
        fn should_ignore(&self, _doc: &SourceDocument) -> bool {
            false
        }
    }

    fn service(store: Arc<MemoryStore>, version: &str) -> IngestService {
        let pipeline = Arc::new(IngestPipeline::new(
            store.clone(),
            Arc::new(UnitEmbedder),
            ChunkLimits::default(),
            PipelineConfig::default(),
        ));
        IngestService::new(
            store,
            Arc::new(FixedProvider {
                version: version.to_string(),
            }),
            pipeline,
        )
    }

    fn params() -> IndexParams {
        IndexParams {
            identifier: "https://example.com/acme/repo.git".to_string(),
            product_name: "acme".to_string(),
            reference: None,
            force_init: false,
        }
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_inputs() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store, "c1");
        let mut bad = params();
        bad.identifier = "  ".to_string();
        assert!(svc.index_source(bad).await.is_err());
        let mut bad = params();
        bad.product_name = String::new();
        assert!(svc.index_source(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_fresh_index_marks_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), "c1");
        let result = svc.index_source(params()).await.unwrap();
        assert_eq!(result.version, "c1");
        assert_eq!(result.processed_files, 1);
        assert!(result.total_chunks > 0);
        let snapshot = store
            .get_snapshot_by_id(result.snapshot_id)
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.indexed);
    }

    #[tokio::test]
    async fn test_rerun_returns_same_snapshot_with_zero_counts() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), "c1");
        let first = svc.index_source(params()).await.unwrap();
        let second = svc.index_source(params()).await.unwrap();
        assert_eq!(first.snapshot_id, second.snapshot_id);
        assert_eq!(second.processed_files, 0);
        assert_eq!(second.total_chunks, 0);
    }

    #[tokio::test]
    async fn test_unfinished_snapshot_is_resumed() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone(), "c1");
        // Simulate a prior failed run: snapshot row exists, not indexed.
        let product = store.upsert_product("acme", None).await.unwrap();
        let source = store
            .upsert_source(product.id, "repo", SourceType::Git, serde_json::json!({}))
            .await
            .unwrap();
        let stale = store.create_snapshot(source.id, "c1").await.unwrap();

        let result = svc.index_source(params()).await.unwrap();
        assert_eq!(result.snapshot_id, stale.id, "row is reused, not recreated");
        assert_eq!(result.processed_files, 1);
        let snapshot = store.get_snapshot_by_id(stale.id).await.unwrap().unwrap();
        assert!(snapshot.indexed);
    }
}
