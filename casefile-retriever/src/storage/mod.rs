//! Storage abstraction layer for casefile-retriever
//!
//! This module defines the persistent vector index: the chunk and document
//! records it holds, and the traits through which ingestion and retrieval reach
//! it. The only implementation is [`sqlite_store::SqliteStore`].
//!
//! ## Key Components
//!
//! - **ChunkStore**: Upserts, point lookups, listings and statistics
//! - **VectorIndex**: Brute-force cosine scoring and ranked queries
//! - **CombinedStore**: Unified interface combining both
//! - **Data Types**: Chunk, ChunkMetadata, DocumentRecord, QueryResult
//!
//! ## Architecture
//!
//! ```text
//! ChunkStore ──┐
//!              ├─ CombinedStore ── SqliteStore (concrete implementation)
//! VectorIndex ─┘
//! ```
//!
//! Chunk ids are derived from the source file name and chunk ordinal (see
//! [`DocumentOrigin::chunk_id`]), so re-ingesting a document overwrites its
//! previous rows instead of duplicating them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub mod error;
pub mod sqlite_store;

pub use error::{Result, StoreError};

/// Unique identifier of a stored chunk.
pub type ChunkId = String;

/// Kind of document a chunk was extracted from.
///
/// The known kinds serialize as lowercase strings; anything else round-trips
/// through [`SourceType::Other`] unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Text,
    Pdf,
    Docx,
    Pptx,
    Html,
    Eml,
    Audio,
    Fallback,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Text => "text",
            SourceType::Pdf => "pdf",
            SourceType::Docx => "docx",
            SourceType::Pptx => "pptx",
            SourceType::Html => "html",
            SourceType::Eml => "eml",
            SourceType::Audio => "audio",
            SourceType::Fallback => "fallback",
            SourceType::Other(other) => other,
        }
    }
}

impl From<&str> for SourceType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => SourceType::Text,
            "pdf" => SourceType::Pdf,
            "docx" => SourceType::Docx,
            "pptx" => SourceType::Pptx,
            "html" => SourceType::Html,
            "eml" => SourceType::Eml,
            "audio" => SourceType::Audio,
            "fallback" => SourceType::Fallback,
            _ => SourceType::Other(value.to_string()),
        }
    }
}

impl From<String> for SourceType {
    fn from(value: String) -> Self {
        SourceType::from(value.as_str())
    }
}

impl From<SourceType> for String {
    fn from(value: SourceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chunk metadata.
///
/// `extra` holds open-ended keys (transcript language, email headers, ...)
/// and is flattened into the same JSON object as the typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ChunkMetadata {
    pub fn new(source_file: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            source_file: source_file.into(),
            chunk_index,
            source_type: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    /// Add an open-ended key. Keys that collide with a typed field are stored
    /// under an `extracted_` prefix instead, since the flattened JSON cannot
    /// hold both.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        let key = if RESERVED_METADATA_KEYS.contains(&key.as_str()) {
            format!("extracted_{key}")
        } else {
            key
        };
        self.extra.insert(key, value);
        self
    }

    /// Add every entry of `extras` through [`ChunkMetadata::with_extra`].
    pub fn with_extras<'a>(self, extras: impl IntoIterator<Item = (&'a String, &'a Value)>) -> Self {
        extras
            .into_iter()
            .fold(self, |metadata, (key, value)| metadata.with_extra(key.as_str(), value.clone()))
    }
}

/// Typed [`ChunkMetadata`] fields; these may not appear in `extra`.
pub const RESERVED_METADATA_KEYS: &[&str] = &["source_file", "chunk_index", "source_type"];

/// The atomic indexed unit: text, its embedding, and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, text: impl Into<String>, embedding: Vec<f32>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata,
        }
    }

    /// Reject chunks the index refuses to store.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(StoreError::EmptyText {
                chunk_id: self.id.clone(),
            });
        }
        if self.embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding {
                context: format!("chunk {}", self.id),
            });
        }
        if let Some(key) = RESERVED_METADATA_KEYS
            .iter()
            .find(|key| self.metadata.extra.contains_key(**key))
        {
            return Err(StoreError::ReservedMetadataKey {
                chunk_id: self.id.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

/// How a document entered the index; decides the chunk id scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentOrigin {
    /// Uploaded by a user for a single case.
    Upload,
    /// Part of a bulk-ingested corpus directory.
    Corpus,
}

impl DocumentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOrigin::Upload => "upload",
            DocumentOrigin::Corpus => "corpus",
        }
    }

    /// Deterministic chunk id for ordinal `index` of `source_file`.
    pub fn chunk_id(&self, source_file: &str, index: usize) -> ChunkId {
        match self {
            DocumentOrigin::Upload => format!("upload_{source_file}_chunk_{index}"),
            DocumentOrigin::Corpus => format!("{source_file}_chunk_{index}"),
        }
    }
}

/// Bookkeeping for one ingested document, written alongside its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Records are keyed by origin and file, matching the chunk id scheme
    pub origin: DocumentOrigin,
    pub source_file: String,
    pub source_type: Option<SourceType>,
    /// blake3 hex digest of the extracted text
    pub content_hash: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// One scored chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Query filter for chunk listings.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub source_file: Option<String>,
    pub limit: Option<usize>,
}

/// Summary counters for the whole index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub chunk_count: usize,
    pub document_count: usize,
    /// Chunk counts keyed by source type; chunks without one count as "unknown".
    pub source_types: BTreeMap<String, usize>,
    /// Distinct embedding lengths present. More than one entry means queries
    /// will fail with a dimension mismatch.
    pub embedding_dimensions: Vec<usize>,
}

/// Chunk and document persistence.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or fully replace chunks by id, all in one transaction
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    /// Replace a document's record and upsert its chunks in one transaction
    async fn upsert_document(&self, record: &DocumentRecord, chunks: &[Chunk]) -> Result<()>;

    /// Get a specific chunk by ID
    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// List chunks in insertion order
    async fn list_chunks(&self, filter: ChunkFilter) -> Result<Vec<Chunk>>;

    async fn get_document(
        &self,
        origin: DocumentOrigin,
        source_file: &str,
    ) -> Result<Option<DocumentRecord>>;

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    async fn index_stats(&self) -> Result<IndexStats>;
}

/// Vector similarity search operations.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Score every stored chunk against `query`, in insertion order.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] if any stored embedding
    /// has a different length than the query.
    async fn score_all(&self, query: &[f32]) -> Result<Vec<QueryResult>>;

    /// Score all chunks, then apply the index's ranking policy and keep `top_k`.
    async fn query(&self, query: &[f32], top_k: usize) -> Result<Vec<QueryResult>>;
}

/// Unified store combining chunk persistence and vector search.
pub trait CombinedStore: ChunkStore + VectorIndex + Send + Sync {}

impl<T: ChunkStore + VectorIndex + Send + Sync> CombinedStore for T {}
