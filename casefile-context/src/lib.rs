pub mod passage;
pub mod text;

// Re-export the main chunking entry points for external use
pub use passage::{ContextPassage, format_context};
pub use text::{TextChunk, WordWindowChunker, chunk_text};
