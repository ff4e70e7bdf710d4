use anyhow::{Result, bail};
use casefile_context::{TextChunk, WordWindowChunker};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for chunking extracted document text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum number of words in each chunk
    pub max_words: usize,
    /// Words shared between consecutive windows of a long paragraph
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_words: casefile_context::text::DEFAULT_MAX_WORDS,
            overlap: casefile_context::text::DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_words: usize, overlap: usize) -> Result<Self> {
        let config = Self { max_words, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_words == 0 {
            bail!("chunking max_words must be positive");
        }
        if self.overlap >= self.max_words {
            bail!(
                "chunking overlap ({}) must be smaller than max_words ({})",
                self.overlap,
                self.max_words
            );
        }
        Ok(())
    }
}

/// Strategy for chunking documents - delegates the windowing to casefile-context
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
    chunker: WordWindowChunker,
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

impl ChunkingStrategy {
    /// Create a new chunking strategy with the given configuration
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            chunker: WordWindowChunker::new(config.max_words, config.overlap),
            config,
        }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a document's extracted text
    pub fn chunk_content(&self, source_file: &str, content: &str) -> Vec<TextChunk> {
        let chunks = self.chunker.chunk_segments(content);

        tracing::debug!(
            "Chunked {} into {} chunks (max words: {}, overlap: {})",
            source_file,
            chunks.len(),
            self.config.max_words,
            self.config.overlap
        );

        chunks
    }

    /// Check if a file in a corpus directory should be ingested based on its path
    pub fn should_index_file(&self, file_path: &Path) -> bool {
        // Skip hidden files and common binary/generated file extensions
        if let Some(filename) = file_path.file_name().and_then(|n| n.to_str()) {
            if filename.starts_with('.') {
                return false;
            }
        }

        let extension = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            // Evidence formats the extractor understands
            Some("txt") | Some("md") | Some("csv") | Some("log") | Some("eml") | Some("html")
            | Some("htm") | Some("pdf") | Some("docx") | Some("pptx") | Some("mp3")
            | Some("wav") | Some("m4a") | Some("aac") | Some("flac") | Some("ogg")
            | Some("wma") | Some("webm") => true,

            // Binary and generated files we skip
            Some("exe") | Some("dll") | Some("so") | Some("dylib") | Some("bin") | Some("png")
            | Some("jpg") | Some("jpeg") | Some("gif") | Some("ico") | Some("zip")
            | Some("gz") | Some("db") | Some("sqlite") | Some("wal") | Some("shm")
            | Some("lock") => false,

            // Files without extensions - check if they're common text files
            None => {
                if let Some(filename) = file_path.file_name().and_then(|n| n.to_str()) {
                    matches!(filename, "README" | "NOTES" | "TRANSCRIPT")
                } else {
                    false
                }
            }

            // Unknown extensions - default to ingesting through the fallback decoder
            Some(_) => true,
        }
    }
}
