//! Query-time facade: embed a question, rank the index, shape the evidence.

use super::citation::{CitationPolicy, Claim, SourceRef, sources_from_results};
use crate::storage::{CombinedStore, QueryResult};
use anyhow::{Context, Result};
use casefile_context::{ContextPassage, format_context};
use casefile_embed::EmbeddingProvider;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a generator needs from one retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    /// Ranked results, protected class first
    pub results: Vec<QueryResult>,
    /// Distinct source files in rank order
    pub sources: Vec<SourceRef>,
    /// Formatted passages ready to paste into a prompt
    pub context: String,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Render ranked results as prompt context passages.
pub fn build_context(results: &[QueryResult]) -> String {
    let passages: Vec<ContextPassage> = results
        .iter()
        .map(|r| {
            ContextPassage::new(
                r.metadata.source_file.clone(),
                r.metadata.source_type.as_ref().map(|t| t.to_string()),
                r.metadata.chunk_index,
                r.score,
                r.text.clone(),
            )
        })
        .collect();
    format_context(&passages)
}

pub struct Retriever {
    store: Arc<dyn CombinedStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    citation: CitationPolicy,
}

impl Retriever {
    pub fn new(store: Arc<dyn CombinedStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            citation: CitationPolicy::default(),
        }
    }

    pub fn with_citation_policy(mut self, citation: CitationPolicy) -> Self {
        self.citation = citation;
        self
    }

    pub fn citation_policy(&self) -> &CitationPolicy {
        &self.citation
    }

    /// Embed `query_text` and return the `top_k` best chunks under the
    /// store's ranking policy.
    ///
    /// # Errors
    /// Embedding failures and storage failures are both fatal here.
    pub async fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Retrieval> {
        let embedding = self
            .embedder
            .embed_query(query_text)
            .await
            .context("failed to embed query")?;

        let results = self
            .store
            .query(&embedding, top_k)
            .await
            .context("failed to query index")?;
        debug!("Query returned {} results", results.len());

        let sources = sources_from_results(&results);
        let context = build_context(&results);
        info!(
            "Retrieved {} chunks from {} sources",
            results.len(),
            sources.len()
        );

        Ok(Retrieval {
            results,
            sources,
            context,
        })
    }

    /// Repair the citations of generated claims against the sources that
    /// were retrieved for them.
    pub fn attribute(&self, claims: &mut [Claim], sources: &[SourceRef]) {
        self.citation.apply(claims, sources);
    }
}
