//! # casefile-embed
//!
//! The embedding boundary of the casefile retrieval stack. Document chunks and
//! search queries are turned into dense `f32` vectors by an
//! [`EmbeddingProvider`]; the rest of the system only ever talks to the trait.
//!
//! ## Providers
//!
//! - [`HttpEmbeddingProvider`]: a remote API speaking either the Cohere
//!   `embed` shape or the OpenAI-compatible `embeddings` shape. Documents and
//!   queries are embedded with the matching `input_type` on Cohere.
//! - [`MockEmbeddingProvider`]: deterministic hashed bag-of-words vectors for
//!   tests and offline runs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use casefile_embed::{EmbedConfig, EmbeddingProvider, HttpEmbeddingProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Reads the key from COHERE_API_KEY
//! let provider = HttpEmbeddingProvider::new(EmbedConfig::cohere())?;
//!
//! let texts = vec!["Email from HR".to_string(), "Call transcript".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}",
//!          result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.
//! A provider never returns a partial result: a count mismatch or ragged
//! dimensions are reported as [`EmbedError::InvalidResponse`].

pub mod config;
pub mod error;
pub mod provider;

// Re-export main types for easy access
pub use config::{EmbedApi, EmbedConfig};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, HttpEmbeddingProvider, InputKind, MockEmbeddingProvider,
    validate_embeddings,
};
