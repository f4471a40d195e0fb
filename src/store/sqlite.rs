//! SQLite [`Store`] backed by sqlx, WAL mode.
//!
//! Schema highlights:
//! - uniqueness constraints back the idempotent-upsert semantics:
//!   `products(name)`, `sources(product_id, name)`,
//!   `source_snapshots(source_id, version)`, `files(snapshot_id, path)`,
//!   `chunks(file_id, ordinal)`,
//!   `summaries(snapshot_id, summary_type, target_path, arch_type)`;
//! - embedding vectors are stored as little-endian f32 BLOBs;
//! - deletes cascade from snapshots through files, chunks, embeddings,
//!   and summaries.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::models::{
    ArchType, Chunk, ChunkMetadata, Embedding, FileDomain, FileRecord, Product, Source,
    SourceSnapshot, SourceType, Summary, SummaryEmbedding, SummaryType,
};

use super::{
    score_similarity, ScoredChunk, ScoredSummary, Store, StoreError, StoreResult,
};

/// Embedding column codec: a vector is stored as packed little-endian
/// f32 bytes, 4 bytes per dimension. The layout is shared by the chunk
/// and summary embedding tables.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|dim| dim.to_le_bytes()).collect()
}

/// Decode an embedding column back into a vector. Trailing bytes that do
/// not fill a dimension are ignored.
pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    let mut vector = Vec::with_capacity(blob.len() / 4);
    for bytes in blob.chunks_exact(4) {
        let mut dim = [0u8; 4];
        dim.copy_from_slice(bytes);
        vector.push(f32::from_le_bytes(dim));
    }
    vector
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn parse_uuid(text: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(text).map_err(|e| StoreError::backend(format!("bad uuid in row: {e}")))
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run the
    /// schema migrations. Idempotent.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::backend(format!("creating db dir: {e}")))?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(StoreError::backend)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::backend)?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(product_id, name),
                FOREIGN KEY (product_id) REFERENCES products(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS source_snapshots (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                version_identifier TEXT NOT NULL,
                indexed INTEGER NOT NULL DEFAULT 0,
                indexed_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE(source_id, version_identifier),
                FOREIGN KEY (source_id) REFERENCES sources(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                snapshot_id TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                language TEXT,
                domain TEXT,
                UNIQUE(snapshot_id, path),
                FOREIGN KEY (snapshot_id) REFERENCES source_snapshots(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                level INTEGER NOT NULL,
                kind TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                snapshot_id TEXT NOT NULL,
                commit_hash TEXT,
                author TEXT,
                updated_at INTEGER,
                is_latest INTEGER NOT NULL DEFAULT 1,
                chunk_key TEXT NOT NULL,
                UNIQUE(file_id, ordinal),
                FOREIGN KEY (file_id) REFERENCES files(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT NOT NULL,
                model TEXT NOT NULL,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (chunk_id, model),
                FOREIGN KEY (chunk_id) REFERENCES chunks(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                snapshot_id TEXT NOT NULL,
                summary_type TEXT NOT NULL,
                target_path TEXT NOT NULL DEFAULT '',
                depth INTEGER,
                parent_path TEXT,
                arch_type TEXT,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(snapshot_id, summary_type, target_path, arch_type),
                FOREIGN KEY (snapshot_id) REFERENCES source_snapshots(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS summary_embeddings (
                summary_id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (summary_id) REFERENCES summaries(id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_files_snapshot ON files(snapshot_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_snapshot ON chunks(snapshot_id)",
            "CREATE INDEX IF NOT EXISTS idx_summaries_snapshot ON summaries(snapshot_id)",
            "CREATE INDEX IF NOT EXISTS idx_snapshots_source ON source_snapshots(source_id)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        }
        Ok(())
    }

    fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Product> {
        Ok(Product {
            id: parse_uuid(row.get("id"))?,
            name: row.get("name"),
            description: row.get("description"),
            created_at: from_ts(row.get("created_at")),
            updated_at: from_ts(row.get("updated_at")),
        })
    }

    fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Source> {
        let type_text: String = row.get("source_type");
        let metadata_json: String = row.get("metadata_json");
        Ok(Source {
            id: parse_uuid(row.get("id"))?,
            product_id: parse_uuid(row.get("product_id"))?,
            name: row.get("name"),
            source_type: SourceType::parse(&type_text)
                .ok_or_else(|| StoreError::backend(format!("bad source type: {type_text}")))?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
            created_at: from_ts(row.get("created_at")),
            updated_at: from_ts(row.get("updated_at")),
        })
    }

    fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> StoreResult<SourceSnapshot> {
        let indexed: i64 = row.get("indexed");
        let indexed_at: Option<i64> = row.get("indexed_at");
        Ok(SourceSnapshot {
            id: parse_uuid(row.get("id"))?,
            source_id: parse_uuid(row.get("source_id"))?,
            version: row.get("version_identifier"),
            indexed: indexed != 0,
            indexed_at: indexed_at.map(from_ts),
            created_at: from_ts(row.get("created_at")),
        })
    }

    fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> StoreResult<FileRecord> {
        let domain: Option<String> = row.get("domain");
        Ok(FileRecord {
            id: parse_uuid(row.get("id"))?,
            snapshot_id: parse_uuid(row.get("snapshot_id"))?,
            path: row.get("path"),
            size: row.get("size"),
            content_type: row.get("content_type"),
            content_hash: row.get("content_hash"),
            language: row.get("language"),
            domain: domain.as_deref().and_then(FileDomain::parse),
        })
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Chunk> {
        let metadata_json: String = row.get("metadata_json");
        let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| StoreError::backend(format!("bad chunk metadata: {e}")))?;
        let updated_at: Option<i64> = row.get("updated_at");
        let is_latest: i64 = row.get("is_latest");
        Ok(Chunk {
            id: parse_uuid(row.get("id"))?,
            file_id: parse_uuid(row.get("file_id"))?,
            ordinal: row.get("ordinal"),
            start_line: row.get::<i64, _>("start_line") as u32,
            end_line: row.get::<i64, _>("end_line") as u32,
            content: row.get("content"),
            content_hash: row.get("content_hash"),
            token_count: row.get::<i64, _>("token_count") as usize,
            metadata,
            snapshot_id: parse_uuid(row.get("snapshot_id"))?,
            commit_hash: row.get("commit_hash"),
            author: row.get("author"),
            updated_at: updated_at.map(from_ts),
            is_latest: is_latest != 0,
            chunk_key: row.get("chunk_key"),
        })
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Summary> {
        let type_text: String = row.get("summary_type");
        let arch_text: Option<String> = row.get("arch_type");
        let depth: Option<i64> = row.get("depth");
        let metadata_json: String = row.get("metadata_json");
        Ok(Summary {
            id: parse_uuid(row.get("id"))?,
            snapshot_id: parse_uuid(row.get("snapshot_id"))?,
            summary_type: SummaryType::parse(&type_text)
                .ok_or_else(|| StoreError::backend(format!("bad summary type: {type_text}")))?,
            target_path: row.get("target_path"),
            depth: depth.map(|d| d as u32),
            parent_path: row.get("parent_path"),
            arch_type: arch_text.as_deref().and_then(ArchType::parse),
            content: row.get("content"),
            content_hash: row.get("content_hash"),
            source_hash: row.get("source_hash"),
            metadata: serde_json::from_str::<serde_json::Value>(&metadata_json)
                .unwrap_or(serde_json::json!({})),
            created_at: from_ts(row.get("created_at")),
            updated_at: from_ts(row.get("updated_at")),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_product(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> StoreResult<Product> {
        let now = ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let row = sqlx::query("SELECT * FROM products WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Self::row_to_product(&row)
    }

    async fn get_product_by_name(&self, name: &str) -> StoreResult<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn upsert_source(
        &self,
        product_id: Uuid,
        name: &str,
        source_type: SourceType,
        metadata: serde_json::Value,
    ) -> StoreResult<Source> {
        let now = ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO sources (id, product_id, name, source_type, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(product_id, name) DO UPDATE SET
                source_type = excluded.source_type,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(product_id.to_string())
        .bind(name)
        .bind(source_type.as_str())
        .bind(metadata.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let row = sqlx::query("SELECT * FROM sources WHERE product_id = ? AND name = ?")
            .bind(product_id.to_string())
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Self::row_to_source(&row)
    }

    async fn list_sources(&self, product_id: Uuid) -> StoreResult<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE product_id = ? ORDER BY name")
            .bind(product_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(Self::row_to_source).collect()
    }

    async fn create_snapshot(
        &self,
        source_id: Uuid,
        version: &str,
    ) -> StoreResult<SourceSnapshot> {
        let snapshot = SourceSnapshot {
            id: Uuid::new_v4(),
            source_id,
            version: version.to_string(),
            indexed: false,
            indexed_at: None,
            created_at: Utc::now(),
        };
        let result = sqlx::query(
            r#"
            INSERT INTO source_snapshots (id, source_id, version_identifier, indexed, created_at)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(snapshot.id.to_string())
        .bind(source_id.to_string())
        .bind(version)
        .bind(ts(snapshot.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(snapshot),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::SnapshotVersionConflict {
                    source_id,
                    version: version.to_string(),
                })
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    async fn get_snapshot(
        &self,
        source_id: Uuid,
        version: &str,
    ) -> StoreResult<Option<SourceSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM source_snapshots WHERE source_id = ? AND version_identifier = ?",
        )
        .bind(source_id.to_string())
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn get_snapshot_by_id(&self, id: Uuid) -> StoreResult<Option<SourceSnapshot>> {
        let row = sqlx::query("SELECT * FROM source_snapshots WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn latest_indexed_snapshot(
        &self,
        source_id: Uuid,
    ) -> StoreResult<Option<SourceSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM source_snapshots
            WHERE source_id = ? AND indexed = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(source_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn list_snapshots(&self, source_id: Uuid) -> StoreResult<Vec<SourceSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM source_snapshots WHERE source_id = ? ORDER BY created_at DESC",
        )
        .bind(source_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        rows.iter().map(Self::row_to_snapshot).collect()
    }

    async fn mark_snapshot_indexed(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE source_snapshots SET indexed = 1, indexed_at = ? WHERE id = ?",
        )
        .bind(ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "snapshot" });
        }
        Ok(())
    }

    async fn delete_snapshot(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let id_text = id.to_string();
        sqlx::query(
            r#"
            DELETE FROM embeddings WHERE chunk_id IN
                (SELECT id FROM chunks WHERE snapshot_id = ?)
            "#,
        )
        .bind(&id_text)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        sqlx::query(
            r#"
            DELETE FROM summary_embeddings WHERE summary_id IN
                (SELECT id FROM summaries WHERE snapshot_id = ?)
            "#,
        )
        .bind(&id_text)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        for table in ["chunks", "files", "summaries"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE snapshot_id = ?"))
                .bind(&id_text)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
        }
        sqlx::query("DELETE FROM source_snapshots WHERE id = ?")
            .bind(&id_text)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn create_file(&self, file: &FileRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files (id, snapshot_id, path, size, content_type, content_hash, language, domain)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id.to_string())
        .bind(file.snapshot_id.to_string())
        .bind(&file.path)
        .bind(file.size)
        .bind(&file.content_type)
        .bind(&file.content_hash)
        .bind(&file.language)
        .bind(file.domain.map(|d| d.as_str()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list_files(&self, snapshot_id: Uuid) -> StoreResult<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT * FROM files WHERE snapshot_id = ? ORDER BY path")
            .bind(snapshot_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(Self::row_to_file).collect()
    }

    async fn delete_files_by_paths(
        &self,
        snapshot_id: Uuid,
        paths: &[String],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for path in paths {
            sqlx::query(
                r#"
                DELETE FROM embeddings WHERE chunk_id IN (
                    SELECT c.id FROM chunks c
                    JOIN files f ON f.id = c.file_id
                    WHERE f.snapshot_id = ? AND f.path = ?
                )
                "#,
            )
            .bind(snapshot_id.to_string())
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
            sqlx::query(
                r#"
                DELETE FROM chunks WHERE file_id IN (
                    SELECT id FROM files WHERE snapshot_id = ? AND path = ?
                )
                "#,
            )
            .bind(snapshot_id.to_string())
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
            sqlx::query("DELETE FROM files WHERE snapshot_id = ? AND path = ?")
                .bind(snapshot_id.to_string())
                .bind(path)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn file_hashes(&self, snapshot_id: Uuid) -> StoreResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT path, content_hash FROM files WHERE snapshot_id = ?")
            .bind(snapshot_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(rows
            .iter()
            .map(|r| (r.get("path"), r.get("content_hash")))
            .collect())
    }

    async fn batch_create_chunks(&self, chunks: &[Chunk]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| StoreError::backend(format!("encoding chunk metadata: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, file_id, ordinal, start_line, end_line, content, content_hash,
                    token_count, level, kind, metadata_json, snapshot_id, commit_hash,
                    author, updated_at, is_latest, chunk_key
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(chunk.file_id.to_string())
            .bind(chunk.ordinal)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(chunk.token_count as i64)
            .bind(chunk.metadata.level as i64)
            .bind(&chunk.metadata.kind)
            .bind(metadata_json)
            .bind(chunk.snapshot_id.to_string())
            .bind(&chunk.commit_hash)
            .bind(&chunk.author)
            .bind(chunk.updated_at.map(ts))
            .bind(chunk.is_latest as i64)
            .bind(&chunk.chunk_key)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn list_chunks_by_file(&self, file_id: Uuid) -> StoreResult<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ? ORDER BY ordinal")
            .bind(file_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn list_chunks_by_snapshot(&self, snapshot_id: Uuid) -> StoreResult<Vec<Chunk>> {
        let rows =
            sqlx::query("SELECT * FROM chunks WHERE snapshot_id = ? ORDER BY chunk_key")
                .bind(snapshot_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn delete_chunks_by_file(&self, file_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
        )
        .bind(file_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(StoreError::backend)?;
        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_chunk(&self, id: Uuid) -> StoreResult<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(Self::row_to_chunk).transpose()
    }

    async fn chunk_parent(&self, chunk: &Chunk) -> StoreResult<Option<Chunk>> {
        let Some(parent_name) = chunk.metadata.parent_name.as_deref() else {
            return Ok(None);
        };
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE file_id = ? AND level = 2 ORDER BY ordinal",
        )
        .bind(chunk.file_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        for row in &rows {
            let candidate = Self::row_to_chunk(row)?;
            if candidate.metadata.name.as_deref() == Some(parent_name) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn chunk_children(
        &self,
        file_id: Uuid,
        parent_name: &str,
    ) -> StoreResult<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE file_id = ? ORDER BY ordinal")
            .bind(file_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let mut out = Vec::new();
        for row in &rows {
            let chunk = Self::row_to_chunk(row)?;
            if chunk.metadata.parent_name.as_deref() == Some(parent_name) {
                out.push(chunk);
            }
        }
        Ok(out)
    }

    async fn create_embedding(&self, embedding: &Embedding) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, vector, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chunk_id, model) DO UPDATE SET
                vector = excluded.vector, created_at = excluded.created_at
            "#,
        )
        .bind(embedding.chunk_id.to_string())
        .bind(&embedding.model)
        .bind(encode_vector(&embedding.vector))
        .bind(ts(embedding.created_at))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn batch_create_embeddings(&self, embeddings: &[Embedding]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        for embedding in embeddings {
            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, model, vector, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chunk_id, model) DO UPDATE SET
                    vector = excluded.vector, created_at = excluded.created_at
                "#,
            )
            .bind(embedding.chunk_id.to_string())
            .bind(&embedding.model)
            .bind(encode_vector(&embedding.vector))
            .bind(ts(embedding.created_at))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        }
        tx.commit().await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn count_embeddings(&self, snapshot_id: Uuid) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM embeddings e
            JOIN chunks c ON c.id = e.chunk_id
            WHERE c.snapshot_id = ?
            "#,
        )
        .bind(snapshot_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(count as u64)
    }

    async fn create_summary(&self, summary: &Summary) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO summaries (
                id, snapshot_id, summary_type, target_path, depth, parent_path,
                arch_type, content, content_hash, source_hash, metadata_json,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(summary.id.to_string())
        .bind(summary.snapshot_id.to_string())
        .bind(summary.summary_type.as_str())
        .bind(&summary.target_path)
        .bind(summary.depth.map(|d| d as i64))
        .bind(&summary.parent_path)
        .bind(summary.arch_type.map(|a| a.as_str()))
        .bind(&summary.content)
        .bind(&summary.content_hash)
        .bind(&summary.source_hash)
        .bind(summary.metadata.to_string())
        .bind(ts(summary.created_at))
        .bind(ts(summary.updated_at))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn update_summary(&self, summary: &Summary) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE summaries SET
                content = ?, content_hash = ?, source_hash = ?, metadata_json = ?,
                depth = ?, parent_path = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&summary.content)
        .bind(&summary.content_hash)
        .bind(&summary.source_hash)
        .bind(summary.metadata.to_string())
        .bind(summary.depth.map(|d| d as i64))
        .bind(&summary.parent_path)
        .bind(ts(summary.updated_at))
        .bind(summary.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "summary" });
        }
        Ok(())
    }

    async fn get_summary(
        &self,
        snapshot_id: Uuid,
        summary_type: SummaryType,
        target_path: &str,
        arch_type: Option<ArchType>,
    ) -> StoreResult<Option<Summary>> {
        let row = match arch_type {
            Some(arch) => {
                sqlx::query(
                    r#"
                    SELECT * FROM summaries
                    WHERE snapshot_id = ? AND summary_type = ? AND target_path = ? AND arch_type = ?
                    "#,
                )
                .bind(snapshot_id.to_string())
                .bind(summary_type.as_str())
                .bind(target_path)
                .bind(arch.as_str())
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM summaries
                    WHERE snapshot_id = ? AND summary_type = ? AND target_path = ? AND arch_type IS NULL
                    "#,
                )
                .bind(snapshot_id.to_string())
                .bind(summary_type.as_str())
                .bind(target_path)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(StoreError::backend)?;
        row.as_ref().map(Self::row_to_summary).transpose()
    }

    async fn list_summaries(
        &self,
        snapshot_id: Uuid,
        summary_type: Option<SummaryType>,
    ) -> StoreResult<Vec<Summary>> {
        let rows = match summary_type {
            Some(t) => {
                sqlx::query(
                    "SELECT * FROM summaries WHERE snapshot_id = ? AND summary_type = ? ORDER BY target_path",
                )
                .bind(snapshot_id.to_string())
                .bind(t.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM summaries WHERE snapshot_id = ? ORDER BY target_path")
                    .bind(snapshot_id.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StoreError::backend)?;
        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn upsert_summary_embedding(
        &self,
        embedding: &SummaryEmbedding,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO summary_embeddings (summary_id, model, vector, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(summary_id) DO UPDATE SET
                model = excluded.model,
                vector = excluded.vector,
                created_at = excluded.created_at
            "#,
        )
        .bind(embedding.summary_id.to_string())
        .bind(&embedding.model)
        .bind(encode_vector(&embedding.vector))
        .bind(ts(embedding.created_at))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get_summary_embedding(
        &self,
        summary_id: Uuid,
    ) -> StoreResult<Option<SummaryEmbedding>> {
        let row = sqlx::query("SELECT * FROM summary_embeddings WHERE summary_id = ?")
            .bind(summary_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let blob: Vec<u8> = row.get("vector");
        Ok(Some(SummaryEmbedding {
            summary_id,
            vector: decode_vector(&blob),
            model: row.get("model"),
            created_at: from_ts(row.get("created_at")),
        }))
    }

    async fn vector_search_chunks(
        &self,
        snapshot_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.*, e.vector AS embedding_vector FROM chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            WHERE c.snapshot_id = ?
            "#,
        )
        .bind(snapshot_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = Self::row_to_chunk(row)?;
            let blob: Vec<u8> = row.get("embedding_vector");
            let score = score_similarity(query, &decode_vector(&blob));
            hits.push(ScoredChunk { chunk, score });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn vector_search_summaries(
        &self,
        snapshot_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> StoreResult<Vec<ScoredSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*, se.vector AS embedding_vector FROM summaries s
            JOIN summary_embeddings se ON se.summary_id = s.id
            WHERE s.snapshot_id = ?
            "#,
        )
        .bind(snapshot_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let summary = Self::row_to_summary(row)?;
            let blob: Vec<u8> = row.get("embedding_vector");
            let score = score_similarity(query, &decode_vector(&blob));
            hits.push(ScoredSummary { summary, score });
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}
