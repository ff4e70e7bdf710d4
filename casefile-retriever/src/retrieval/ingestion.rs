//! Ingestion pipeline: files in, embedded chunks out.
//!
//! The pipeline coordinates the collaborators it is handed and owns none of
//! them:
//!
//! ```text
//! bytes → DocumentExtractor → ChunkingStrategy → EmbeddingProvider → CombinedStore
//!                                   ↓
//!                         DocumentRecord (hash, count)
//! ```
//!
//! Each document ends in exactly one of three outcomes. It is **ingested** when
//! its chunks and document record were committed together. It is **skipped**
//! when there was nothing to do: no text, no chunks, or unchanged content. It
//! **failed** when extraction or embedding went wrong. A bad document never
//! stops the batch. Storage errors do: they abort the call and are returned to
//! the caller.

use super::chunking_strategy::ChunkingStrategy;
use super::extraction::{DocumentExtractor, ExtractedText};
use crate::storage::{Chunk, ChunkMetadata, CombinedStore, DocumentOrigin, DocumentRecord, SourceType};
use anyhow::{Context, Result};
use casefile_embed::{EmbeddingProvider, validate_embeddings};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A document whose chunks were written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestedDocument {
    pub source_file: String,
    pub source_type: SourceType,
    pub chunk_count: usize,
}

/// A document that needed no work, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub source_file: String,
    pub reason: String,
}

/// A document that could not be ingested, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestFailure {
    pub source_file: String,
    pub reason: String,
}

/// What happened to a single document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum DocumentOutcome {
    Ingested(IngestedDocument),
    Skipped(SkippedDocument),
    Failed(IngestFailure),
}

impl DocumentOutcome {
    fn skipped(source_file: &str, reason: impl Into<String>) -> Self {
        DocumentOutcome::Skipped(SkippedDocument {
            source_file: source_file.to_string(),
            reason: reason.into(),
        })
    }

    fn failed(source_file: &str, reason: impl Into<String>) -> Self {
        DocumentOutcome::Failed(IngestFailure {
            source_file: source_file.to_string(),
            reason: reason.into(),
        })
    }
}

/// Outcomes of a batch, grouped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub ingested: Vec<IngestedDocument>,
    pub skipped: Vec<SkippedDocument>,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn record(&mut self, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::Ingested(doc) => self.ingested.push(doc),
            DocumentOutcome::Skipped(doc) => self.skipped.push(doc),
            DocumentOutcome::Failed(doc) => self.failures.push(doc),
        }
    }

    pub fn total_chunks(&self) -> usize {
        self.ingested.iter().map(|d| d.chunk_count).sum()
    }
}

/// Counters accumulated over the pipeline's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionStats {
    pub documents_ingested: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_written: usize,
    pub embeddings_generated: usize,
}

/// Coordinates extraction, chunking, embedding and storage.
pub struct IngestionPipeline {
    store: Arc<dyn CombinedStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn DocumentExtractor>,
    chunking: ChunkingStrategy,
    force: bool,
    stats: RwLock<IngestionStats>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn CombinedStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn DocumentExtractor>,
        chunking: ChunkingStrategy,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            chunking,
            force: false,
            stats: RwLock::new(IngestionStats::default()),
        }
    }

    /// Re-embed and rewrite documents even when their content is unchanged.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Ingest uploaded files, in the given order.
    ///
    /// Chunk ids use the upload scheme (`upload_{name}_chunk_{i}`).
    ///
    /// # Errors
    /// Only storage failures. Per-document problems are reported in the
    /// returned [`IngestReport`].
    pub async fn ingest_uploads(&self, files: Vec<(String, Vec<u8>)>) -> Result<IngestReport> {
        self.ingest_files(files, DocumentOrigin::Upload).await
    }

    /// Ingest named in-memory files under an explicit origin, in order.
    pub async fn ingest_files(
        &self,
        files: Vec<(String, Vec<u8>)>,
        origin: DocumentOrigin,
    ) -> Result<IngestReport> {
        info!("Ingesting {} files ({:?})", files.len(), origin);
        let mut report = IngestReport::default();
        for (name, bytes) in files {
            let outcome = self.ingest_bytes(&name, &bytes, origin).await?;
            report.record(outcome);
        }
        self.log_report(&report);
        Ok(report)
    }

    /// Ingest every eligible file under `dir` as a corpus document.
    ///
    /// The walk honours `.gitignore` files and skips hidden entries. Files are
    /// processed in sorted path order and named by their path relative to
    /// `dir`, with `/` separators.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport> {
        info!("Starting corpus ingestion of: {}", dir.display());
        let files = self.discover_files(dir).await?;
        info!("Found {} candidate files", files.len());

        let mut report = IngestReport::default();
        for path in files {
            let name = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    report.record(DocumentOutcome::failed(&name, format!("read error: {e}")));
                    continue;
                }
            };

            let outcome = self.ingest_bytes(&name, &bytes, DocumentOrigin::Corpus).await?;
            report.record(outcome);
        }
        self.log_report(&report);
        Ok(report)
    }

    async fn discover_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            anyhow::bail!("{} is not a directory", dir.display());
        }

        let root = dir.to_path_buf();
        let strategy = self.chunking.clone();
        let mut files = tokio::task::spawn_blocking(move || {
            ignore::WalkBuilder::new(&root)
                .hidden(true)
                .git_ignore(true)
                .require_git(false)
                .build()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
                .map(|entry| entry.into_path())
                .filter(|path| strategy.should_index_file(path))
                .collect::<Vec<_>>()
        })
        .await
        .context("directory walk task failed")?;

        files.sort();
        Ok(files)
    }

    /// Extract, then ingest, one named file.
    pub async fn ingest_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        origin: DocumentOrigin,
    ) -> Result<DocumentOutcome> {
        let extracted = self.extractor.extract(name, bytes).await;
        self.ingest_extracted(name, extracted, origin).await
    }

    /// Ingest text that has already been extracted, for example a transcript
    /// produced by an external speech-to-text service.
    pub async fn ingest_extracted(
        &self,
        name: &str,
        extracted: ExtractedText,
        origin: DocumentOrigin,
    ) -> Result<DocumentOutcome> {
        let outcome = self.process_document(name, extracted, origin).await?;

        let mut stats = self.stats.write().await;
        match &outcome {
            DocumentOutcome::Ingested(doc) => {
                info!("Ingested {} ({} chunks)", doc.source_file, doc.chunk_count);
                stats.documents_ingested += 1;
                stats.chunks_written += doc.chunk_count;
                stats.embeddings_generated += doc.chunk_count;
            }
            DocumentOutcome::Skipped(doc) => {
                warn!("Skipped {}: {}", doc.source_file, doc.reason);
                stats.documents_skipped += 1;
            }
            DocumentOutcome::Failed(doc) => {
                warn!("Failed to ingest {}: {}", doc.source_file, doc.reason);
                stats.documents_failed += 1;
            }
        }
        Ok(outcome)
    }

    async fn process_document(
        &self,
        name: &str,
        extracted: ExtractedText,
        origin: DocumentOrigin,
    ) -> Result<DocumentOutcome> {
        if let Some(error) = extracted.error {
            return Ok(DocumentOutcome::failed(name, error));
        }
        if extracted.text.trim().is_empty() {
            return Ok(DocumentOutcome::skipped(name, "no extractable text"));
        }

        let segments = self.chunking.chunk_content(name, &extracted.text);
        if segments.is_empty() {
            return Ok(DocumentOutcome::skipped(name, "no chunks produced"));
        }

        let content_hash = blake3::hash(extracted.text.as_bytes()).to_hex().to_string();
        if !self.force {
            let existing = self
                .store
                .get_document(origin, name)
                .await
                .with_context(|| format!("failed to look up document {name}"))?;
            if existing.is_some_and(|doc| {
                doc.content_hash == content_hash && doc.chunk_count == segments.len()
            }) {
                return Ok(DocumentOutcome::skipped(name, "unchanged"));
            }
        }

        let texts: Vec<String> = segments.iter().map(|s| s.chunk_text.clone()).collect();
        let embeddings = match self.embedder.embed_texts(&texts).await {
            Ok(result) => result.embeddings,
            Err(e) => return Ok(DocumentOutcome::failed(name, format!("embedding failed: {e}"))),
        };
        if let Err(e) = validate_embeddings(texts.len(), &embeddings) {
            return Ok(DocumentOutcome::failed(name, format!("embedding failed: {e}")));
        }
        debug!("Embedded {} chunks for {}", embeddings.len(), name);

        let chunks: Vec<Chunk> = texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (text, embedding))| {
                let metadata = ChunkMetadata::new(name, index)
                    .with_source_type(extracted.source_type.clone())
                    .with_extras(&extracted.metadata);
                Chunk::new(origin.chunk_id(name, index), text, embedding, metadata)
            })
            .collect();

        let record = DocumentRecord {
            origin,
            source_file: name.to_string(),
            source_type: Some(extracted.source_type.clone()),
            content_hash,
            chunk_count: chunks.len(),
            ingested_at: Utc::now(),
        };
        self.store
            .upsert_document(&record, &chunks)
            .await
            .with_context(|| format!("failed to store chunks for {name}"))?;

        Ok(DocumentOutcome::Ingested(IngestedDocument {
            source_file: name.to_string(),
            source_type: extracted.source_type,
            chunk_count: chunks.len(),
        }))
    }

    fn log_report(&self, report: &IngestReport) {
        info!(
            "Ingestion finished: {} ingested ({} chunks), {} skipped, {} failed",
            report.ingested.len(),
            report.total_chunks(),
            report.skipped.len(),
            report.failures.len()
        );
    }

    /// Get a snapshot of the pipeline's counters.
    pub async fn get_stats(&self) -> IngestionStats {
        self.stats.read().await.clone()
    }
}
