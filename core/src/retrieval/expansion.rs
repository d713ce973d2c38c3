//! Pseudo-relevance feedback: grow a query with the most frequent terms of
//! its best-ranked documents.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{Query, QueryEngine, ScoredDoc};
use crate::document::DocumentBuilder;
use crate::source::DocumentSource;
use crate::tokenizer::Tokenizer;

pub const FEEDBACK_DOCUMENTS: usize = 10;
pub const EXPANSION_TERMS: usize = 10;

pub struct QueryExpander {
    builder: DocumentBuilder,
    source: Arc<dyn DocumentSource>,
    documents: usize,
    terms: usize,
}

impl QueryExpander {
    pub fn new(tokenizer: Arc<Tokenizer>, source: Arc<dyn DocumentSource>) -> Self {
        Self { builder: DocumentBuilder::new(tokenizer), source, documents: FEEDBACK_DOCUMENTS, terms: EXPANSION_TERMS }
    }

    pub fn with_limits(mut self, documents: usize, terms: usize) -> Self {
        self.documents = documents;
        self.terms = terms;
        self
    }

    /// Re-read the top hits, sum their term frequencies (ignoring numbers)
    /// and append the most frequent terms to the query text.
    pub fn expand(&self, query: &Query, hits: &[ScoredDoc], engine: &QueryEngine) -> Query {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for hit in hits.iter().take(self.documents) {
            let Some(record) = engine.document(hit.doc_id) else { continue };
            let path = Path::new(&record.path);
            let raw = match self.source.load(path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(doc_id = hit.doc_id, error = %e, "cannot reload document for expansion");
                    continue;
                }
            };
            let doc = self.builder.build(&raw, record.path.as_str());
            for (term, tf) in doc.term_frequencies() {
                if !term.chars().all(|c| c.is_ascii_digit()) {
                    *counts.entry(term.clone()).or_insert(0) += u64::from(*tf);
                }
            }
        }

        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let extra: Vec<&str> = ranked.iter().take(self.terms).map(|(t, _)| t.as_str()).collect();
        if extra.is_empty() {
            return query.clone();
        }
        let text = format!("{} {}", query.text(), extra.join(" "));
        tracing::debug!(query_id = query.id(), expanded = %text, "query expanded");
        Query::new(query.id(), &text, self.builder.tokenizer())
    }
}
