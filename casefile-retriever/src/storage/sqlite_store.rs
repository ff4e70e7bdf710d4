//! SQLite implementation of the vector index
//!
//! Chunks live in a single table with the embedding stored as a blob of
//! native-endian `f32` values and metadata stored as JSON. Similarity search
//! is a full scan: every row is read in insertion order and scored on a
//! blocking thread.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE chunks (
//!     seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- scan order, kept on replace
//!     id TEXT NOT NULL UNIQUE,
//!     source_file TEXT NOT NULL,
//!     embedding BLOB NOT NULL,
//!     text TEXT NOT NULL,
//!     metadata TEXT NOT NULL
//! );
//!
//! CREATE TABLE documents (
//!     origin TEXT NOT NULL,                   -- upload | corpus
//!     source_file TEXT NOT NULL,
//!     source_type TEXT,
//!     content_hash TEXT NOT NULL,
//!     chunk_count INTEGER NOT NULL,
//!     ingested_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
//!     PRIMARY KEY (origin, source_file)
//! );
//! ```
//!
//! ## SQLite Settings
//!
//! - **WAL mode**: readers see a consistent snapshot while a writer commits
//! - **Busy timeout**: concurrent writers wait instead of failing immediately
//! - **Single connection in memory**: every caller shares the same database

use super::{
    Chunk, ChunkFilter, ChunkMetadata, ChunkStore, DocumentOrigin, DocumentRecord, IndexStats, QueryResult, Result,
    SourceType, StoreError, VectorIndex,
};
use crate::retrieval::ranking::RankingPolicy;
use crate::retrieval::similarity::score_candidates;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;
use std::time::Duration;

/// A chunk row as read from disk, before the embedding blob is decoded.
struct StoredRow {
    id: String,
    embedding: Vec<u8>,
    text: String,
    metadata: String,
}

impl StoredRow {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            embedding: row.try_get("embedding")?,
            text: row.try_get("text")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn into_chunk(self) -> Result<Chunk> {
        let embedding = decode_embedding(&self.id, &self.embedding)?;
        let metadata: ChunkMetadata = serde_json::from_str(&self.metadata)?;
        Ok(Chunk {
            id: self.id,
            text: self.text,
            embedding,
            metadata,
        })
    }
}

fn encode_embedding(embedding: &[f32]) -> &[u8] {
    bytemuck::cast_slice::<f32, u8>(embedding)
}

/// Blobs from SQLite carry no alignment guarantee, so values are read one at a
/// time rather than cast in place.
fn decode_embedding(chunk_id: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % size_of::<f32>() != 0 {
        return Err(StoreError::CorruptEmbedding {
            chunk_id: chunk_id.to_string(),
            len: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect())
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord> {
    let source_type: Option<String> = row.try_get("source_type")?;
    let chunk_count: i64 = row.try_get("chunk_count")?;
    let origin: String = row.try_get("origin")?;
    Ok(DocumentRecord {
        origin: serde_json::from_value(serde_json::Value::String(origin))?,
        source_file: row.try_get("source_file")?,
        source_type: source_type.map(SourceType::from),
        content_hash: row.try_get("content_hash")?,
        chunk_count: chunk_count as usize,
        ingested_at: row.try_get::<DateTime<Utc>, _>("ingested_at")?,
    })
}

/// SQLite-backed [`ChunkStore`] and [`VectorIndex`].
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    ranking: RankingPolicy,
}

impl SqliteStore {
    /// Opens (creating if needed) a persistent index at `db_path`.
    ///
    /// The parent directory must already exist.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_secs(5))
                    .create_if_missing(true),
            )
            .await?;
        tracing::debug!("Opened index database at {}", db_path.display());
        Self::new_with_pool(pool).await
    }

    /// Opens an in-memory index for testing.
    pub async fn open_memory() -> Result<Self> {
        // every pooled connection to ":memory:" would get its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self {
            pool,
            ranking: RankingPolicy::default(),
        })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_file TEXT NOT NULL,
                embedding BLOB NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                origin TEXT NOT NULL,
                source_file TEXT NOT NULL,
                source_type TEXT,
                content_hash TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                ingested_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (origin, source_file)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_file ON chunks(source_file)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Replace the ranking policy used by [`VectorIndex::query`].
    pub fn with_ranking_policy(mut self, ranking: RankingPolicy) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn ranking_policy(&self) -> &RankingPolicy {
        &self.ranking
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_chunk(conn: &mut SqliteConnection, chunk: &Chunk) -> Result<()> {
        chunk.validate()?;
        let metadata = serde_json::to_string(&chunk.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, source_file, embedding, text, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                source_file = excluded.source_file,
                embedding = excluded.embedding,
                text = excluded.text,
                metadata = excluded.metadata
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.metadata.source_file)
        .bind(encode_embedding(&chunk.embedding))
        .bind(&chunk.text)
        .bind(metadata)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn fetch_rows(&self, filter: &ChunkFilter) -> Result<Vec<StoredRow>> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = match &filter.source_file {
            Some(source_file) => {
                sqlx::query(
                    "SELECT id, embedding, text, metadata FROM chunks
                     WHERE source_file = ?1 ORDER BY seq LIMIT ?2",
                )
                .bind(source_file)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT id, embedding, text, metadata FROM chunks ORDER BY seq LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(StoredRow::from_row).collect()
    }
}

/// Decode and score all rows. Runs on a blocking thread.
fn score_rows(query: &[f32], rows: Vec<StoredRow>) -> Result<Vec<QueryResult>> {
    let embeddings: Vec<Vec<f32>> = rows
        .par_iter()
        .map(|row| decode_embedding(&row.id, &row.embedding))
        .collect::<Vec<Result<Vec<f32>>>>()
        .into_iter()
        .collect::<Result<_>>()?;

    let scores = score_candidates(
        query,
        rows.par_iter()
            .map(|row| row.id.as_str())
            .zip(embeddings.par_iter().map(Vec::as_slice)),
    )?;

    rows.into_iter()
        .zip(scores)
        .map(|(row, score)| {
            Ok(QueryResult {
                metadata: serde_json::from_str(&row.metadata)?,
                chunk_id: row.id,
                score,
                text: row.text,
            })
        })
        .collect()
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            Self::write_chunk(&mut *tx, chunk).await?;
        }
        tx.commit().await?;
        tracing::debug!("Upserted {} chunks", chunks.len());
        Ok(())
    }

    async fn upsert_document(&self, record: &DocumentRecord, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            Self::write_chunk(&mut *tx, chunk).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (origin, source_file, source_type, content_hash, chunk_count, ingested_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(origin, source_file) DO UPDATE SET
                source_type = excluded.source_type,
                content_hash = excluded.content_hash,
                chunk_count = excluded.chunk_count,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(record.origin.as_str())
        .bind(&record.source_file)
        .bind(record.source_type.as_ref().map(SourceType::as_str))
        .bind(&record.content_hash)
        .bind(record.chunk_count as i64)
        .bind(record.ingested_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(
            "Stored document {} with {} chunks",
            record.source_file,
            chunks.len()
        );
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT id, embedding, text, metadata FROM chunks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| StoredRow::from_row(&row)?.into_chunk())
            .transpose()
    }

    async fn list_chunks(&self, filter: ChunkFilter) -> Result<Vec<Chunk>> {
        self.fetch_rows(&filter)
            .await?
            .into_iter()
            .map(StoredRow::into_chunk)
            .collect()
    }

    async fn get_document(
        &self,
        origin: DocumentOrigin,
        source_file: &str,
    ) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT origin, source_file, source_type, content_hash, chunk_count, ingested_at
             FROM documents WHERE origin = ?1 AND source_file = ?2",
        )
        .bind(origin.as_str())
        .bind(source_file)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT origin, source_file, source_type, content_hash, chunk_count, ingested_at
             FROM documents ORDER BY source_file, origin",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn index_stats(&self) -> Result<IndexStats> {
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let type_rows = sqlx::query(
            "SELECT COALESCE(json_extract(metadata, '$.source_type'), 'unknown') AS source_type,
                    COUNT(*) AS count
             FROM chunks GROUP BY 1 ORDER BY 1",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut source_types = std::collections::BTreeMap::new();
        for row in &type_rows {
            let source_type: String = row.try_get("source_type")?;
            let count: i64 = row.try_get("count")?;
            source_types.insert(source_type, count as usize);
        }

        let dimensions: Vec<i64> =
            sqlx::query_scalar("SELECT DISTINCT length(embedding) / 4 FROM chunks ORDER BY 1")
                .fetch_all(&self.pool)
                .await?;

        Ok(IndexStats {
            chunk_count: chunk_count as usize,
            document_count: document_count as usize,
            source_types,
            embedding_dimensions: dimensions.into_iter().map(|d| d as usize).collect(),
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn score_all(&self, query: &[f32]) -> Result<Vec<QueryResult>> {
        if query.is_empty() {
            return Err(StoreError::EmptyEmbedding {
                context: "query".to_string(),
            });
        }

        // fetched in one statement, so the scan sees a single snapshot
        let rows = self.fetch_rows(&ChunkFilter::default()).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let row_count = rows.len();
        let query = query.to_vec();
        let results = tokio::task::spawn_blocking(move || score_rows(&query, rows)).await??;
        tracing::debug!("Scored {} chunks", row_count);
        Ok(results)
    }

    async fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<QueryResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let raw = self.score_all(query).await?;
        Ok(self.ranking.rank(raw, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DocumentOrigin;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn chunk(id: &str, file: &str, text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk::new(id, text, embedding, ChunkMetadata::new(file, 0))
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        assert!(store.score_all(&[1.0, 0.0]).await?.is_empty());
        assert!(store.query(&[1.0, 0.0], 5).await?.is_empty());
        assert_eq!(store.index_stats().await?, IndexStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_and_get_round_trip() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        let metadata = ChunkMetadata::new("call.mp3", 3)
            .with_source_type(SourceType::Audio)
            .with_extra("language", json!("en"));
        let original = Chunk::new("upload_call.mp3_chunk_3", "we spoke", vec![0.25, -1.5, 3.0], metadata);

        store.upsert_chunks(std::slice::from_ref(&original)).await?;
        let loaded = store.get_chunk(&original.id).await?;
        assert_eq!(loaded, Some(original));
        assert_eq!(store.get_chunk("missing").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_replaces() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .upsert_chunks(&[
                chunk("a", "a.txt", "first", vec![1.0, 0.0]),
                chunk("b", "b.txt", "second", vec![0.0, 1.0]),
            ])
            .await?;

        // same id again: replaces in place, keeps scan position
        let replacement = Chunk::new(
            "a",
            "first, revised",
            vec![0.5, 0.5],
            ChunkMetadata::new("a.txt", 0).with_extra("revision", json!(2)),
        );
        store.upsert_chunks(std::slice::from_ref(&replacement)).await?;
        store.upsert_chunks(std::slice::from_ref(&replacement)).await?;

        let all = store.list_chunks(ChunkFilter::default()).await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], replacement);
        assert_eq!(all[1].id, "b");
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_chunk_rolls_back_batch() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        let result = store
            .upsert_chunks(&[
                chunk("ok", "a.txt", "fine", vec![1.0]),
                chunk("bad", "a.txt", "   ", vec![1.0]),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::EmptyText { .. })));
        assert!(store.list_chunks(ChunkFilter::default()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_score_all_in_insertion_order() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .upsert_chunks(&[
                chunk("x", "x.txt", "x", vec![1.0, 0.0]),
                chunk("y", "y.txt", "y", vec![0.0, 1.0]),
                chunk("z", "z.txt", "z", vec![1.0, 1.0]),
            ])
            .await?;

        let scored = store.score_all(&[1.0, 0.0]).await?;
        let ids: Vec<&str> = scored.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
        assert!((scored[0].score - 1.0).abs() < 1e-6);
        assert_eq!(scored[1].score, 0.0);
        assert!((scored[2].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        let top = store.query(&[1.0, 0.0], 2).await?;
        let ids: Vec<&str> = top.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .upsert_chunks(&[
                chunk("two", "a.txt", "a", vec![1.0, 0.0]),
                chunk("three", "b.txt", "b", vec![1.0, 0.0, 0.0]),
            ])
            .await?;

        let err = store.query(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { ref chunk_id, expected: 2, found: 3 } if chunk_id == "three"
        ));
        assert!(matches!(
            store.score_all(&[]).await,
            Err(StoreError::EmptyEmbedding { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_applies_ranking_policy() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        store
            .upsert_chunks(&[
                chunk("text", "email.txt", "email", vec![1.0, 0.0]),
                chunk("audio", "call.mp3", "call", vec![1.0, 1.0]),
            ])
            .await?;

        let ranked = store.query(&[1.0, 0.0], 2).await?;
        assert_eq!(ranked[0].chunk_id, "audio");

        let plain = store
            .clone()
            .with_ranking_policy(RankingPolicy::similarity_only())
            .query(&[1.0, 0.0], 2)
            .await?;
        assert_eq!(plain[0].chunk_id, "text");
        assert!(store.query(&[1.0, 0.0], 0).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_documents_and_stats() -> anyhow::Result<()> {
        let store = SqliteStore::open_memory().await?;
        let origin = DocumentOrigin::Upload;
        let chunks: Vec<Chunk> = (0..3)
            .map(|i| {
                Chunk::new(
                    origin.chunk_id("call.mp3", i),
                    format!("part {i}"),
                    vec![1.0, i as f32],
                    ChunkMetadata::new("call.mp3", i).with_source_type(SourceType::Audio),
                )
            })
            .collect();
        let record = DocumentRecord {
            origin,
            source_file: "call.mp3".to_string(),
            source_type: Some(SourceType::Audio),
            content_hash: blake3::hash(b"part 0 part 1 part 2").to_hex().to_string(),
            chunk_count: 3,
            ingested_at: Utc::now(),
        };
        store.upsert_document(&record, &chunks).await?;
        store
            .upsert_chunks(&[chunk("loose", "notes", "no type", vec![0.0, 1.0])])
            .await?;

        let loaded = store.get_document(origin, "call.mp3").await?.unwrap();
        assert_eq!(loaded.origin, DocumentOrigin::Upload);
        assert!(store.get_document(DocumentOrigin::Corpus, "call.mp3").await?.is_none());
        assert_eq!(loaded.content_hash, record.content_hash);
        assert_eq!(loaded.chunk_count, 3);
        assert_eq!(loaded.source_type, Some(SourceType::Audio));
        assert_eq!(store.list_documents().await?.len(), 1);

        let filtered = store
            .list_chunks(ChunkFilter {
                source_file: Some("call.mp3".to_string()),
                limit: Some(2),
            })
            .await?;
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].id, "upload_call.mp3_chunk_0");

        let stats = store.index_stats().await?;
        assert_eq!(stats.chunk_count, 4);
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.source_types.get("audio"), Some(&3));
        assert_eq!(stats.source_types.get("unknown"), Some(&1));
        assert_eq!(stats.embedding_dimensions, vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_writers_and_readers() -> anyhow::Result<()> {
        let store = Arc::new(SqliteStore::open_memory().await?);

        let mut handles = Vec::new();
        for writer in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let batch: Vec<Chunk> = (0..10)
                    .map(|i| chunk(&format!("w{writer}_c{i}"), &format!("w{writer}.txt"), "text", vec![1.0, i as f32]))
                    .collect();
                store.upsert_chunks(&batch).await?;
                store.score_all(&[1.0, 0.0]).await.map(|r| r.len())
            }));
        }
        for handle in handles {
            let seen = handle.await??;
            // batches commit atomically
            assert_eq!(seen % 10, 0);
        }

        assert_eq!(store.index_stats().await?.chunk_count, 40);
        Ok(())
    }

    #[tokio::test]
    async fn test_persists_across_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.db");

        {
            let store = SqliteStore::open(&path).await?;
            store
                .upsert_chunks(&[chunk("kept", "memo.txt", "durable", vec![0.5, 0.5])])
                .await?;
            store.pool().close().await;
        }

        let reopened = SqliteStore::open(&path).await?;
        let loaded = reopened.get_chunk("kept").await?.unwrap();
        assert_eq!(loaded.text, "durable");
        assert_eq!(loaded.embedding, vec![0.5, 0.5]);
        Ok(())
    }

    #[test]
    fn test_corrupt_embedding_blob() {
        assert!(matches!(
            decode_embedding("c", &[0, 0, 128]),
            Err(StoreError::CorruptEmbedding { len: 3, .. })
        ));
        assert_eq!(decode_embedding("c", &[]).unwrap(), Vec::<f32>::new());
    }
}
