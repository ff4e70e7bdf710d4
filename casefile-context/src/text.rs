//! Paragraph-aware word-window chunking for evidence documents.
//!
//! Documents arriving from extraction (emails, transcripts, PDFs turned into
//! text) are split into the units that get embedded and indexed. The chunker
//! respects document structure first and only falls back to a sliding window
//! when a paragraph is too long:
//!
//! 1. Line endings are normalized (`\r\n` and lone `\r` become `\n`).
//! 2. The text is split into paragraphs on blank lines. A line holding only
//!    spaces or tabs counts as blank.
//! 3. A paragraph of at most `max_words` words becomes one chunk.
//! 4. A longer paragraph is covered by windows of `max_words` words, each
//!    window starting `max_words - overlap` words after the previous one.
//!
//! Chunk text is the paragraph's words joined by single spaces, so internal
//! whitespace runs and line breaks inside a paragraph collapse.
//!
//! # Example
//!
//! ```
//! use casefile_context::text::{WordWindowChunker, chunk_text};
//!
//! let text = "From: hr@example.com\r\nSubject: complaint\r\n\r\nThe meeting happened on Monday.";
//! let chunks = chunk_text(text, 200, 50);
//! assert_eq!(
//!     chunks,
//!     vec![
//!         "From: hr@example.com Subject: complaint".to_string(),
//!         "The meeting happened on Monday.".to_string(),
//!     ]
//! );
//!
//! // Long paragraphs are windowed with overlap.
//! let chunker = WordWindowChunker::new(4, 1);
//! let segments = chunker.chunk_segments("a b c d e f g");
//! let texts: Vec<&str> = segments.iter().map(|c| c.chunk_text.as_str()).collect();
//! assert_eq!(texts, vec!["a b c d", "d e f g"]);
//! ```
use regex::Regex;
use serde::Serialize;
use std::ops::Range;
use std::sync::LazyLock;

/// Default maximum number of words per chunk used at ingestion time.
pub const DEFAULT_MAX_WORDS: usize = 200;

/// Default number of words shared by consecutive windows of one paragraph.
pub const DEFAULT_OVERLAP: usize = 50;

/// A blank line: newline, optional horizontal whitespace, newline.
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph break pattern is valid"));

/// Splits text into overlapping word windows, one paragraph at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordWindowChunker {
    max_words: usize,
    overlap: usize,
}

/// A single chunk together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position of this chunk in document order (0-indexed).
    pub sequence: usize,
    /// Index of the paragraph the chunk was cut from.
    pub paragraph: usize,
    /// Word positions covered by this chunk, relative to its paragraph.
    pub word_range: Range<usize>,
    /// Words of the chunk joined by single spaces.
    pub chunk_text: String,
}

impl Default for WordWindowChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORDS, DEFAULT_OVERLAP)
    }
}

impl WordWindowChunker {
    /// Creates a chunker. Parameters are not validated here; a zero
    /// `max_words` produces no chunks and `overlap >= max_words` stops each
    /// paragraph after its first window.
    pub fn new(max_words: usize, overlap: usize) -> Self {
        Self { max_words, overlap }
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk `text` and return only the chunk strings, in document order.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        self.chunk_segments(text)
            .into_iter()
            .map(|chunk| chunk.chunk_text)
            .collect()
    }

    /// Chunk `text` and keep the paragraph and word positions of every chunk.
    pub fn chunk_segments(&self, text: &str) -> Vec<TextChunk> {
        if self.max_words == 0 || text.trim().is_empty() {
            return Vec::new();
        }

        let normalized = normalize_line_endings(text);
        let mut chunks = Vec::new();

        for (paragraph, words) in split_paragraphs(&normalized).into_iter().enumerate() {
            for word_range in self.windows(words.len()) {
                chunks.push(TextChunk {
                    sequence: chunks.len(),
                    paragraph,
                    chunk_text: words[word_range.clone()].join(" "),
                    word_range,
                });
            }
        }

        chunks
    }

    /// Word ranges covering a paragraph of `word_count` words.
    fn windows(&self, word_count: usize) -> Vec<Range<usize>> {
        if word_count == 0 {
            return Vec::new();
        }
        if word_count <= self.max_words {
            return vec![0..word_count];
        }

        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.max_words).min(word_count);
            ranges.push(start..end);
            if end == word_count {
                break;
            }

            let next = end.saturating_sub(self.overlap);
            if next <= start {
                // overlap >= max_words: the window can never advance
                break;
            }
            start = next;
        }
        ranges
    }
}

/// Convenience wrapper around [`WordWindowChunker::chunk`].
pub fn chunk_text(text: &str, max_words: usize, overlap: usize) -> Vec<String> {
    WordWindowChunker::new(max_words, overlap).chunk(text)
}

/// Replace `\r\n` and lone `\r` with `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split normalized text into paragraphs, each given as its word list.
/// Paragraphs without any words are dropped.
fn split_paragraphs(normalized: &str) -> Vec<Vec<&str>> {
    PARAGRAPH_BREAK
        .split(normalized)
        .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>())
        .filter(|words| !words.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(chunk_text("", 10, 3).is_empty());
        assert!(chunk_text("   \n\n\t  \r\n", 10, 3).is_empty());
    }

    #[test]
    fn test_short_paragraphs_become_single_chunks() {
        let text = "First paragraph here.\n\nSecond   paragraph\nspans two lines.\n\n\n\nThird.";
        let chunks = chunk_text(text, 10, 3);
        assert_eq!(
            chunks,
            vec![
                "First paragraph here.",
                "Second paragraph spans two lines.",
                "Third.",
            ]
        );
    }

    #[test]
    fn test_crlf_and_whitespace_only_lines_split_paragraphs() {
        let text = "alpha beta\r\n\r\ngamma\r\n  \t\r\ndelta\rsigma";
        let chunks = chunk_text(text, 10, 3);
        assert_eq!(chunks, vec!["alpha beta", "gamma", "delta sigma"]);
    }

    #[test]
    fn test_long_paragraph_windows_with_overlap() {
        let text = numbered_words(12);
        let chunker = WordWindowChunker::new(5, 2);
        let segments = chunker.chunk_segments(&text);

        let ranges: Vec<Range<usize>> = segments.iter().map(|c| c.word_range.clone()).collect();
        assert_eq!(ranges, vec![0..5, 3..8, 6..11, 9..12]);
        assert_eq!(segments[1].chunk_text, "w3 w4 w5 w6 w7");
        assert_eq!(segments[3].chunk_text, "w9 w10 w11");
        assert!(segments.iter().all(|c| c.paragraph == 0));
        assert_eq!(
            segments.iter().map(|c| c.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_paragraph_exactly_max_words_is_not_windowed() {
        let text = numbered_words(5);
        let chunks = chunk_text(&text, 5, 2);
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_thousand_word_paragraph_terminates() {
        let text = numbered_words(1000);
        let chunks = chunk_text(&text, 10, 3);

        // starts at 0, 7, 14, ... 994; the window starting at 994 reaches the end
        assert_eq!(chunks.len(), 143);
        assert!(chunks.iter().all(|c| c.split_whitespace().count() <= 10));
        assert_eq!(chunks.last().map(String::as_str), Some("w994 w995 w996 w997 w998 w999"));
    }

    #[test]
    fn test_overlap_not_smaller_than_max_words_stops() {
        let text = numbered_words(30);
        assert_eq!(chunk_text(&text, 10, 10).len(), 1);
        assert_eq!(chunk_text(&text, 10, 25).len(), 1);
    }

    #[test]
    fn test_zero_max_words_yields_nothing() {
        assert!(chunk_text("some words here", 0, 0).is_empty());
    }

    #[test]
    fn test_sequence_spans_paragraphs() {
        let text = format!("{}\n\nshort one", numbered_words(7));
        let segments = WordWindowChunker::new(5, 1).chunk_segments(&text);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].sequence, 2);
        assert_eq!(segments[2].paragraph, 1);
        assert_eq!(segments[2].word_range, 0..2);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = format!("{}\n\n{}", numbered_words(57), numbered_words(3));
        let chunker = WordWindowChunker::default();
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }
}
