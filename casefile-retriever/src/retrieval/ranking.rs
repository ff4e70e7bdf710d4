//! Class-based re-ranking of similarity results.
//!
//! Some evidence must never be crowded out by a larger volume of general
//! material. Chunks in the protected class (audio transcripts by default) get
//! their score multiplied by a boost factor and are always placed ahead of every
//! other chunk, regardless of how the boosted scores compare.

use crate::storage::{ChunkMetadata, QueryResult, SourceType};
use serde::{Deserialize, Serialize};

/// File extensions treated as audio recordings.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".m4a", ".aac", ".flac", ".ogg", ".wma", ".webm",
];

/// Default multiplier applied to protected-class scores.
pub const DEFAULT_BOOST_FACTOR: f32 = 2.0;

/// A class of evidence that ranking and citation both protect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedClass {
    pub name: String,
    /// Chunks whose metadata carries this source type are members.
    pub source_type: SourceType,
    /// Lowercase filename suffixes, dot included, that also imply membership.
    pub extensions: Vec<String>,
}

impl ProtectedClass {
    /// Audio-derived evidence: `source_type == audio` or an audio file name.
    pub fn audio() -> Self {
        Self {
            name: "audio".to_string(),
            source_type: SourceType::Audio,
            extensions: AUDIO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Whether a file name ends with one of the class's extensions
    /// (case-insensitive).
    pub fn matches_file(&self, source_file: &str) -> bool {
        let lower = source_file.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn matches_source(&self, source_file: &str, source_type: Option<&SourceType>) -> bool {
        source_type == Some(&self.source_type) || self.matches_file(source_file)
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.matches_source(&metadata.source_file, metadata.source_type.as_ref())
    }
}

/// Ranking applied by [`crate::storage::VectorIndex::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct RankingPolicy {
    pub protected: Option<ProtectedClass>,
    pub boost_factor: f32,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            protected: Some(ProtectedClass::audio()),
            boost_factor: DEFAULT_BOOST_FACTOR,
        }
    }
}

impl RankingPolicy {
    /// Plain similarity order with no protected class.
    pub fn similarity_only() -> Self {
        Self {
            protected: None,
            boost_factor: 1.0,
        }
    }

    pub fn with_boost_factor(mut self, boost_factor: f32) -> Self {
        self.boost_factor = boost_factor;
        self
    }

    pub fn is_protected(&self, metadata: &ChunkMetadata) -> bool {
        self.protected
            .as_ref()
            .is_some_and(|class| class.matches(metadata))
    }

    /// Rank raw similarity results and keep the first `top_k`.
    ///
    /// Protected results have their score multiplied by `boost_factor`. Each
    /// group is sorted by descending score (stable, so ties keep scan order)
    /// and the protected group comes first.
    pub fn rank(&self, raw: Vec<QueryResult>, top_k: usize) -> Vec<QueryResult> {
        if top_k == 0 {
            return Vec::new();
        }

        let (mut protected, mut general): (Vec<_>, Vec<_>) = raw
            .into_iter()
            .partition(|result| self.is_protected(&result.metadata));

        for result in &mut protected {
            result.score *= self.boost_factor;
        }

        protected.sort_by(|a, b| b.score.total_cmp(&a.score));
        general.sort_by(|a, b| b.score.total_cmp(&a.score));

        tracing::debug!(
            "Ranked {} protected and {} general results (top_k {})",
            protected.len(),
            general.len(),
            top_k
        );

        protected.extend(general);
        protected.truncate(top_k);
        protected
    }
}
