//! Turning uploaded bytes into plain text.
//!
//! Extraction is a boundary: richer formats (PDF, Office documents, audio)
//! need external tooling, so they reach the index through a custom
//! [`DocumentExtractor`] or through [`super::ingestion::IngestionPipeline::ingest_extracted`].
//! [`BasicExtractor`] handles the formats that need nothing beyond the
//! standard decoding done here.

use super::ranking::AUDIO_EXTENSIONS;
use crate::storage::SourceType;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

/// Extensions decoded directly as UTF-8 text.
pub const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".csv", ".log"];

/// Extensions that require an external document extractor.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[".pdf", ".docx", ".pptx"];

/// Outcome of extracting one file.
///
/// A non-`None` `error` means the text is unusable; the document is recorded
/// as a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub source_type: SourceType,
    /// Extra keys copied into every chunk's metadata
    pub metadata: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl ExtractedText {
    pub fn new(text: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            text: text.into(),
            source_type,
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    pub fn failed(source_type: SourceType, error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            source_type,
            metadata: BTreeMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Converts a named file's bytes into text.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, filename: &str, bytes: &[u8]) -> ExtractedText;
}

/// Lower-cased extension of `filename` including the dot, or `""`.
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Extractor for plain text, email and HTML with no external dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicExtractor;

impl BasicExtractor {
    pub fn extract_bytes(&self, filename: &str, bytes: &[u8]) -> ExtractedText {
        if bytes.is_empty() {
            return ExtractedText::failed(SourceType::Other("unknown".to_string()), "Empty file");
        }

        let extension = file_extension(filename);
        let ext = extension.as_str();

        if TEXT_EXTENSIONS.contains(&ext) {
            return ExtractedText::new(String::from_utf8_lossy(bytes), SourceType::Text);
        }
        if ext == ".eml" {
            return extract_eml(bytes);
        }
        if ext == ".html" || ext == ".htm" {
            return ExtractedText::new(html_to_text(&String::from_utf8_lossy(bytes)), SourceType::Html);
        }
        if DOCUMENT_EXTENSIONS.contains(&ext) {
            return ExtractedText::failed(
                SourceType::from(&ext[1..]),
                format!("{ext} requires an external extractor"),
            );
        }
        if AUDIO_EXTENSIONS.contains(&ext) {
            return ExtractedText::failed(SourceType::Audio, "audio requires an external transcriber");
        }

        tracing::debug!("Fallback text decode for {}", filename);
        ExtractedText::new(String::from_utf8_lossy(bytes), SourceType::Fallback)
    }
}

#[async_trait]
impl DocumentExtractor for BasicExtractor {
    async fn extract(&self, filename: &str, bytes: &[u8]) -> ExtractedText {
        self.extract_bytes(filename, bytes)
    }
}

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")
        .expect("script/style pattern is valid")
});
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/p|/div|/li|/tr|/h[1-6])\b[^>]*>").expect("block tag pattern is valid")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("space pattern is valid"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*").expect("blank line pattern is valid"));

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Strip markup from an HTML document, keeping block boundaries as newlines.
pub fn html_to_text(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let with_breaks = BLOCK_TAG.replace_all(&without_code, "\n");
    let stripped = ANY_TAG.replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);

    let lines: Vec<String> = decoded
        .lines()
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .collect();
    BLANK_LINES
        .replace_all(lines.join("\n").trim(), "\n\n")
        .into_owned()
}

/// Headers and body of a parsed RFC 822 message.
#[derive(Debug, Default, PartialEq)]
struct ParsedEmail {
    from: String,
    to: String,
    subject: String,
    date: String,
    body: String,
}

/// Split raw message text into unfolded `(name, value)` headers and the body.
fn split_headers(raw: &str) -> (Vec<(String, String)>, &str) {
    let (head, body) = match raw.find("\n\n") {
        Some(pos) => (&raw[..pos], &raw[pos + 2..]),
        None => (raw, ""),
    };

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    (headers, body)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> &'a str {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Plain-text body of a message part, preferring text/plain over HTML.
fn part_body(headers: &[(String, String)], body: &str) -> (Option<String>, Option<String>) {
    let content_type = header(headers, "content-type").to_ascii_lowercase();
    let disposition = header(headers, "content-disposition").to_ascii_lowercase();
    if disposition.starts_with("attachment") {
        return (None, None);
    }

    if content_type.starts_with("multipart/") {
        let Some(boundary) = multipart_boundary(header(headers, "content-type")) else {
            return (Some(body.to_string()), None);
        };
        let delimiter = format!("--{boundary}");
        let mut plain = Vec::new();
        let mut html = None;
        for part in body.split(delimiter.as_str()).skip(1) {
            if part.starts_with("--") {
                break;
            }
            let part = part.trim_start_matches('\n');
            let (part_headers, part_content) = split_headers(part);
            let (p, h) = part_body(&part_headers, part_content);
            plain.extend(p);
            if html.is_none() {
                html = h;
            }
        }
        let plain = (!plain.is_empty()).then(|| plain.join("\n"));
        return (plain, html);
    }

    if content_type.starts_with("text/html") {
        (None, Some(html_to_text(body)))
    } else {
        (Some(body.trim().to_string()), None)
    }
}

fn parse_email(raw: &str) -> ParsedEmail {
    let normalized = raw.replace("\r\n", "\n");
    let (headers, body) = split_headers(&normalized);
    let (plain, html) = part_body(&headers, body);
    let body = plain.or(html).unwrap_or_default().trim().to_string();

    ParsedEmail {
        from: header(&headers, "from").to_string(),
        to: header(&headers, "to").to_string(),
        subject: header(&headers, "subject").to_string(),
        date: header(&headers, "date").to_string(),
        body,
    }
}

fn extract_eml(bytes: &[u8]) -> ExtractedText {
    let email = parse_email(&String::from_utf8_lossy(bytes));
    if email.subject.trim().is_empty() && email.body.trim().is_empty() {
        return ExtractedText::failed(SourceType::Eml, "No usable content in email");
    }

    let text = format!(
        "From: {}\nTo: {}\nSubject: {}\nDate: {}\n\n{}",
        email.from, email.to, email.subject, email.date, email.body
    );
    ExtractedText::new(text, SourceType::Eml)
        .with_metadata("from", Value::from(email.from))
        .with_metadata("to", Value::from(email.to))
        .with_metadata("subject", Value::from(email.subject))
        .with_metadata("date", Value::from(email.date))
}
