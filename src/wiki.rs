//! Wiki generation from stored summaries.
//!
//! Assembles the markdown wiki for a product's newest indexed snapshot:
//! an index page built from the four architecture summaries and one page
//! per summarized directory. Pure orchestration over persisted summaries;
//! no source files are re-read and no new LLM calls are made.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::models::{ArchType, Summary, SummaryType};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct WikiReport {
    pub out_dir: PathBuf,
    pub pages_written: usize,
}

pub struct WikiGenerator {
    store: Arc<dyn Store>,
}

impl WikiGenerator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn generate(
        &self,
        product_name: &str,
        snapshot_id: Uuid,
        out_dir: &Path,
    ) -> Result<WikiReport> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("creating wiki directory {}", out_dir.display()))?;
        let mut pages = 0;

        let arch = self
            .store
            .list_summaries(snapshot_id, Some(SummaryType::Architecture))
            .await?;
        let index = render_index(product_name, &arch);
        std::fs::write(out_dir.join("index.md"), index)?;
        pages += 1;

        let directories = self
            .store
            .list_summaries(snapshot_id, Some(SummaryType::Directory))
            .await?;
        for summary in &directories {
            let page = render_directory(summary);
            std::fs::write(out_dir.join(page_name(&summary.target_path)), page)?;
            pages += 1;
        }

        tracing::info!(pages, out = %out_dir.display(), "wiki generated");
        Ok(WikiReport {
            out_dir: out_dir.to_path_buf(),
            pages_written: pages,
        })
    }
}

fn render_index(product_name: &str, arch: &[Summary]) -> String {
    let mut out = format!("# {product_name}\n");
    for kind in ArchType::ALL {
        let title = match kind {
            ArchType::Overview => "Overview",
            ArchType::TechStack => "Technology Stack",
            ArchType::DataFlow => "Data Flow",
            ArchType::Components => "Components",
        };
        if let Some(summary) = arch.iter().find(|s| s.arch_type == Some(kind)) {
            out.push_str(&format!("\n## {title}\n\n{}\n", summary.content.trim()));
        }
    }
    out
}

fn render_directory(summary: &Summary) -> String {
    let title = if summary.target_path.is_empty() {
        "(root)"
    } else {
        &summary.target_path
    };
    format!("# {title}\n\n{}\n", summary.content.trim())
}

/// Page file name for a directory path: `pkg/server` → `pkg-server.md`,
/// root → `root.md`.
fn page_name(dir_path: &str) -> String {
    if dir_path.is_empty() {
        return "root.md".to_string();
    }
    format!("{}.md", dir_path.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content_hash;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;

    fn summary(
        snapshot_id: Uuid,
        summary_type: SummaryType,
        target_path: &str,
        arch_type: Option<ArchType>,
        content: &str,
    ) -> Summary {
        Summary {
            id: Uuid::new_v4(),
            snapshot_id,
            summary_type,
            target_path: target_path.to_string(),
            depth: None,
            parent_path: None,
            arch_type,
            content: content.to_string(),
            content_hash: content_hash(content.as_bytes()),
            source_hash: content_hash(b"src"),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_page_names() {
        assert_eq!(page_name(""), "root.md");
        assert_eq!(page_name("pkg"), "pkg.md");
        assert_eq!(page_name("pkg/server"), "pkg-server.md");
    }

    #[tokio::test]
    async fn test_generate_writes_index_and_directory_pages() {
        let store = Arc::new(MemoryStore::new());
        let snapshot_id = Uuid::new_v4();
        for (arch, text) in [
            (ArchType::Overview, "An ingestion service."),
            (ArchType::TechStack, "Go and SQLite."),
        ] {
            store
                .create_summary(&summary(
                    snapshot_id,
                    SummaryType::Architecture,
                    "",
                    Some(arch),
                    text,
                ))
                .await
                .unwrap();
        }
        store
            .create_summary(&summary(
                snapshot_id,
                SummaryType::Directory,
                "pkg/server",
                None,
                "HTTP handlers.",
            ))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let generator = WikiGenerator::new(store);
        let report = generator
            .generate("acme", snapshot_id, dir.path())
            .await
            .unwrap();
        assert_eq!(report.pages_written, 2);

        let index = std::fs::read_to_string(dir.path().join("index.md")).unwrap();
        assert!(index.contains("# acme"));
        assert!(index.contains("## Overview"));
        assert!(index.contains("An ingestion service."));

        let page = std::fs::read_to_string(dir.path().join("pkg-server.md")).unwrap();
        assert!(page.contains("# pkg/server"));
        assert!(page.contains("HTTP handlers."));
    }
}
