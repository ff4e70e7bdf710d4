//! Glue between retrieval and an external text generator.
//!
//! The generator itself is not part of this crate. This module builds the
//! retrieval query from a case description and parses whatever the generator
//! sends back into claims the citation policy can repair.

use super::citation::Claim;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured description of a legal matter, as entered on the intake form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaseDescription {
    pub matter_overview: String,
    pub people_and_aliases: String,
    pub noteworthy_organizations: String,
    pub noteworthy_terms: String,
    pub additional_context: String,
    /// Names of the documents supplied with the matter
    pub filenames: Vec<String>,
}

impl CaseDescription {
    /// Flatten the description into the text that is embedded for retrieval.
    pub fn to_query_text(&self) -> String {
        let documents = if self.filenames.is_empty() {
            "not specified".to_string()
        } else {
            self.filenames.join(", ")
        };

        format!(
            "Matter overview:\n{}\n\n\
             People and aliases:\n{}\n\n\
             Noteworthy organizations:\n{}\n\n\
             Noteworthy terms:\n{}\n\n\
             Additional context:\n{}\n\n\
             Documents provided (filenames):\n{}",
            self.matter_overview.trim(),
            self.people_and_aliases.trim(),
            self.noteworthy_organizations.trim(),
            self.noteworthy_terms.trim(),
            self.additional_context.trim(),
            documents
        )
    }
}

/// Parsed generator reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub analysis: String,
    pub issues: Vec<Claim>,
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string, e.g. "json"
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a generator reply into analysis text and claims.
///
/// Replies that are not a JSON object become the analysis verbatim with no
/// issues. A missing or non-array `issues` field yields no issues, and array
/// entries that are not objects are dropped.
pub fn parse_generation_output(raw: &str) -> GenerationOutput {
    let cleaned = strip_code_fences(raw);

    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(cleaned) else {
        tracing::debug!("Generator reply is not a JSON object; keeping it as analysis");
        return GenerationOutput {
            analysis: cleaned.to_string(),
            issues: Vec::new(),
        };
    };

    let analysis = match object.remove("analysis") {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => cleaned.to_string(),
    };

    let issues = match object.remove("issues") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<Claim>(item).ok())
            .collect(),
        _ => Vec::new(),
    };

    GenerationOutput { analysis, issues }
}
