//! Settings for the `casefile` binary, read from an optional TOML file.

use crate::retrieval::chunking_strategy::ChunkingConfig;
use crate::retrieval::citation::CitationPolicy;
use crate::retrieval::ranking::{DEFAULT_BOOST_FACTOR, ProtectedClass, RankingPolicy};
use anyhow::{Context, Result, bail};
use casefile_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "casefile.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/index/casefile.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    /// Score multiplier for protected results
    pub boost_factor: f32,
    /// Treat audio transcripts as the protected class
    pub protect_audio: bool,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            boost_factor: DEFAULT_BOOST_FACTOR,
            protect_audio: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 6 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub chunking: ChunkingConfig,
    pub ranking: RankingSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbedConfig,
}

impl Settings {
    /// Load settings from `path`, or from `casefile.toml` in the working
    /// directory when present, falling back to defaults.
    ///
    /// # Errors
    /// An explicitly named file that cannot be read, any file that does not
    /// parse, and values that fail validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if !self.ranking.boost_factor.is_finite() || self.ranking.boost_factor <= 0.0 {
            bail!(
                "ranking boost_factor must be a positive number, got {}",
                self.ranking.boost_factor
            );
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval top_k must be positive");
        }
        self.embedding.validate()?;
        Ok(())
    }

    pub fn ranking_policy(&self) -> RankingPolicy {
        RankingPolicy {
            protected: self.ranking.protect_audio.then(ProtectedClass::audio),
            boost_factor: self.ranking.boost_factor,
        }
    }

    pub fn citation_policy(&self) -> CitationPolicy {
        if self.ranking.protect_audio {
            CitationPolicy::default()
        } else {
            CitationPolicy::without_protection()
        }
    }
}
