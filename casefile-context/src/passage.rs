//! Formatting of retrieved chunks into the context block handed to a
//! generator.
//!
//! Each passage is rendered as a one-line header followed by its text and a
//! blank line:
//!
//! ```text
//! Source: call.mp3 | Type: audio | Chunk: 0 | Score: 1.8000
//! Yes, I told her the schedule would change.
//!
//! ```
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used when a passage carries no source type.
pub const UNKNOWN_SOURCE_TYPE: &str = "unknown";

/// One retrieved chunk, reduced to what the context block shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPassage {
    pub source_file: String,
    pub source_type: Option<String>,
    pub chunk_index: usize,
    pub score: f32,
    pub text: String,
}

impl ContextPassage {
    pub fn new(
        source_file: impl Into<String>,
        source_type: Option<String>,
        chunk_index: usize,
        score: f32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            source_type,
            chunk_index,
            score,
            text: text.into(),
        }
    }

    /// The header line, without a trailing newline.
    pub fn header(&self) -> String {
        format!(
            "Source: {} | Type: {} | Chunk: {} | Score: {:.4}",
            self.source_file,
            self.source_type.as_deref().unwrap_or(UNKNOWN_SOURCE_TYPE),
            self.chunk_index,
            self.score
        )
    }
}

impl fmt::Display for ContextPassage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}\n\n", self.header(), self.text)
    }
}

/// Concatenate passages, in the given order, into one context block.
pub fn format_context(passages: &[ContextPassage]) -> String {
    passages.iter().map(ToString::to_string).collect()
}
