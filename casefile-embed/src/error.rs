//! Error types for the embedding system

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration problems detected before any request is made, transport
/// failures, non-success responses from the remote API, and responses that do
/// not line up with the request (wrong count, ragged dimensions). Every variant
/// is fatal for the operation that triggered it; callers decide whether that
/// fails a single document or a whole command.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when the provider configuration is invalid
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// The environment variable holding the API key is unset or empty
    #[error("Missing API key: environment variable {env_var} is not set")]
    MissingApiKey { env_var: String },

    /// Transport-level failure talking to the embedding API
    #[error("HTTP request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status
    #[error("Embedding API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The API answered, but the payload does not match the request
    #[error("Invalid embedding response: {message}")]
    InvalidResponse { message: String },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid response error with a custom message.
    ///
    /// Used when the remote API returns a well-formed reply that cannot be
    /// matched to the request, such as a different number of vectors than
    /// texts sent.
    pub fn invalid_response<S: Into<String>>(message: S) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}
