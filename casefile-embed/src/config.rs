//! Configuration for remote embedding APIs

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire format spoken by the embedding endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedApi {
    /// `POST {api_base}/embed` with `texts` and `input_type`.
    #[default]
    Cohere,
    /// `POST {api_base}/embeddings` with `input`, as served by OpenAI and
    /// most self-hosted gateways.
    OpenAi,
}

impl EmbedApi {
    pub fn endpoint(&self, api_base: &str) -> String {
        let base = api_base.trim_end_matches('/');
        match self {
            EmbedApi::Cohere => format!("{base}/embed"),
            EmbedApi::OpenAi => format!("{base}/embeddings"),
        }
    }
}

/// Model used when an OpenAI-compatible config names none.
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// Settings for [`crate::HttpEmbeddingProvider`].
///
/// Every field has a default so a partial `[embedding]` table in a settings
/// file deserializes cleanly. Missing fields take the preset of the chosen
/// `api`, so `api = "openai"` alone yields the OpenAI base URL and key variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PartialEmbedConfig")]
pub struct EmbedConfig {
    pub api: EmbedApi,
    pub api_base: String,
    pub model: String,
    /// Name of the environment variable holding the API key. The key itself
    /// is never stored in configuration.
    pub api_key_env: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self::cohere()
    }
}

/// Deserialized form of [`EmbedConfig`] before the api preset is applied.
#[derive(Debug, Default, Deserialize)]
struct PartialEmbedConfig {
    #[serde(default)]
    api: EmbedApi,
    api_base: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    batch_size: Option<usize>,
    timeout_secs: Option<u64>,
}

impl From<PartialEmbedConfig> for EmbedConfig {
    fn from(partial: PartialEmbedConfig) -> Self {
        let preset = EmbedConfig::preset(partial.api);
        Self {
            api: partial.api,
            api_base: partial.api_base.unwrap_or(preset.api_base),
            model: partial.model.unwrap_or(preset.model),
            api_key_env: partial.api_key_env.unwrap_or(preset.api_key_env),
            batch_size: partial.batch_size.unwrap_or(preset.batch_size),
            timeout_secs: partial.timeout_secs.unwrap_or(preset.timeout_secs),
        }
    }
}

impl EmbedConfig {
    /// Cohere `embed-english-v3.0`, keyed by `COHERE_API_KEY`.
    pub fn cohere() -> Self {
        Self {
            api: EmbedApi::Cohere,
            api_base: "https://api.cohere.ai/v1".to_string(),
            model: "embed-english-v3.0".to_string(),
            api_key_env: "COHERE_API_KEY".to_string(),
            batch_size: 96,
            timeout_secs: 60,
        }
    }

    /// An OpenAI-compatible endpoint serving `model`, keyed by `OPENAI_API_KEY`.
    pub fn openai(model: impl Into<String>) -> Self {
        Self {
            api: EmbedApi::OpenAi,
            api_base: "https://api.openai.com/v1".to_string(),
            model: model.into(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 256,
            timeout_secs: 60,
        }
    }

    /// Default settings for `api`.
    pub fn preset(api: EmbedApi) -> Self {
        match api {
            EmbedApi::Cohere => Self::cohere(),
            EmbedApi::OpenAi => Self::openai(DEFAULT_OPENAI_MODEL),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key_env(mut self, api_key_env: impl Into<String>) -> Self {
        self.api_key_env = api_key_env.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn endpoint(&self) -> String {
        self.api.endpoint(&self.api_base)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the settings that would otherwise only fail at request time.
    pub fn validate(&self) -> Result<()> {
        if self.api_base.trim().is_empty() {
            return Err(EmbedError::invalid_config("api_base must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(EmbedError::invalid_config("model must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be positive"));
        }
        if self.timeout_secs == 0 {
            return Err(EmbedError::invalid_config("timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(EmbedError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            }),
        }
    }
}
