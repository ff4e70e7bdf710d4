//! Citation fidelity for generated claims.
//!
//! A generator is handed retrieved sources and asked to cite them, but it may
//! cite nothing, cite in a shape we did not ask for, or ignore the protected
//! evidence entirely. [`CitationPolicy`] repairs each claim's citation list
//! after generation:
//!
//! - citations are normalized to a deduplicated list of file names;
//! - an empty list is replaced by a fallback built from the retrieved sources;
//! - if protected sources were retrieved but none is cited, the strongest
//!   protected sources are prepended.
//!
//! Applying the policy twice gives the same result as applying it once.

use super::ranking::ProtectedClass;
use crate::storage::{QueryResult, SourceType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Object keys that may hold a file name in object-shaped citations, in
/// priority order.
const CITATION_FILE_KEYS: &[&str] = &["file", "source_file", "filename", "source", "name"];

/// A retrieved source available for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
}

impl SourceRef {
    pub fn new(file: impl Into<String>, score: f32) -> Self {
        Self {
            file: file.into(),
            score,
            source_type: None,
        }
    }
}

/// One unit of generated output. Only `citations` is interpreted; all other
/// fields pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(default)]
    pub citations: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Claim {
    /// The claim's citations as normalized file names.
    pub fn citation_list(&self) -> Vec<String> {
        normalize_citations(&self.citations)
    }
}

/// Dedupe retrieved results by file name, keeping rank order and the first
/// (highest ranked) score for each file.
pub fn sources_from_results(results: &[QueryResult]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.metadata.source_file.as_str()))
        .map(|r| SourceRef {
            file: r.metadata.source_file.clone(),
            score: r.score,
            source_type: r.metadata.source_type.clone(),
        })
        .collect()
}

/// Flatten any accepted citation shape to a list of file names.
///
/// Accepts a comma-separated string, a list of strings, or a list of objects
/// carrying a file name under one of the known keys. Names are trimmed,
/// blanks dropped and duplicates removed, keeping first-seen order.
pub fn normalize_citations(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(items) => items.iter().filter_map(citation_name).collect(),
        _ => Vec::new(),
    };

    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn citation_name(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(object) => CITATION_FILE_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Rules for repairing citation lists.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationPolicy {
    pub protected: Option<ProtectedClass>,
    /// Protected sources prepended when none is cited
    pub max_injected: usize,
    /// Upper bound on a repaired list
    pub max_citations: usize,
    /// Non-protected sources in a fallback list when protected ones exist
    pub max_fallback_others: usize,
    /// Sole citation when nothing was retrieved at all
    pub unknown_label: String,
}

impl Default for CitationPolicy {
    fn default() -> Self {
        Self {
            protected: Some(ProtectedClass::audio()),
            max_injected: 2,
            max_citations: 5,
            max_fallback_others: 3,
            unknown_label: "unknown".to_string(),
        }
    }
}

impl CitationPolicy {
    /// A policy that only normalizes and falls back, never injecting.
    pub fn without_protection() -> Self {
        Self {
            protected: None,
            ..Self::default()
        }
    }

    fn is_protected(&self, source: &SourceRef) -> bool {
        self.protected
            .as_ref()
            .is_some_and(|class| class.matches_source(&source.file, source.source_type.as_ref()))
    }

    fn split_sources<'a>(&self, sources: &'a [SourceRef]) -> (Vec<&'a str>, Vec<&'a str>) {
        let mut protected = Vec::new();
        let mut others = Vec::new();
        for source in sources {
            if self.is_protected(source) {
                protected.push(source.file.as_str());
            } else {
                others.push(source.file.as_str());
            }
        }
        (protected, others)
    }

    /// Citation list for a claim that cited nothing usable.
    pub fn fallback(&self, sources: &[SourceRef]) -> Vec<String> {
        if sources.is_empty() {
            return vec![self.unknown_label.clone()];
        }

        let (protected, others) = self.split_sources(sources);
        let others_limit = if protected.is_empty() {
            self.max_citations
        } else {
            self.max_fallback_others
        };

        protected
            .into_iter()
            .take(self.max_injected)
            .chain(others.into_iter().take(others_limit))
            .take(self.max_citations)
            .map(str::to_string)
            .collect()
    }

    /// Repair one raw citation value against the retrieved sources.
    pub fn enforce(&self, citations: &Value, sources: &[SourceRef]) -> Vec<String> {
        let cited = normalize_citations(citations);
        if cited.is_empty() {
            return self.fallback(sources);
        }

        let (protected, _) = self.split_sources(sources);
        if protected.is_empty() {
            return cited;
        }

        // only retrieved protected sources count; a guessed audio filename does not
        if cited.iter().any(|name| protected.contains(&name.as_str())) {
            return cited;
        }

        tracing::debug!(
            "No protected source cited; injecting {}",
            protected.len().min(self.max_injected)
        );

        let mut seen = HashSet::new();
        protected
            .into_iter()
            .take(self.max_injected)
            .map(str::to_string)
            .chain(cited)
            .filter(|name| seen.insert(name.clone()))
            .take(self.max_citations)
            .collect()
    }

    /// Repair every claim in place. Afterwards each claim's `citations` is a
    /// JSON array of strings.
    pub fn apply(&self, claims: &mut [Claim], sources: &[SourceRef]) {
        for claim in claims.iter_mut() {
            let repaired = self.enforce(&claim.citations, sources);
            claim.citations = Value::from(repaired);
        }
    }
}
