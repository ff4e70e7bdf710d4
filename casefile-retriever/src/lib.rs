//! casefile-retriever: evidence indexing and retrieval for legal case files
//!
//! Documents are extracted, split into word windows, embedded and stored in a
//! single SQLite file. Queries are answered by brute-force cosine scoring with
//! a ranking policy that keeps protected evidence (audio transcripts) at the
//! top, and generated claims are checked so they cite that evidence.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: ingestion pipeline, ranking, citation repair and generation glue
//! - **[`storage`]**: storage traits with the SQLite implementation
//! - **[`config`]**: TOML settings for the `casefile` binary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use casefile_embed::MockEmbeddingProvider;
//! use casefile_retriever::retrieval::{
//!     chunking_strategy::ChunkingStrategy, extraction::BasicExtractor,
//!     ingestion::IngestionPipeline, retriever::Retriever,
//! };
//! use casefile_retriever::storage::sqlite_store::SqliteStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open_memory().await?);
//! let embedder = Arc::new(MockEmbeddingProvider::default());
//!
//! let pipeline = IngestionPipeline::new(
//!     store.clone(),
//!     embedder.clone(),
//!     Arc::new(BasicExtractor),
//!     ChunkingStrategy::default(),
//! );
//! pipeline
//!     .ingest_uploads(vec![("email1.txt".into(), b"My shift was cut.".to_vec())])
//!     .await?;
//!
//! let retrieval = Retriever::new(store, embedder).retrieve("shift cut", 6).await?;
//! println!("{}", retrieval.context);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Files → Extractor → Chunking → Embeddings → SQLite Storage
//!                                                  ↓
//! Claims ← CitationPolicy ← Retriever ← RankingPolicy
//! ```

pub mod config;
pub mod retrieval;
pub mod storage;
