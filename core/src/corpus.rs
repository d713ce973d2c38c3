use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::document::Document;
use crate::index::DocId;

/// Batch-scoped mapping from term to the ordered set of documents holding it.
#[derive(Debug, Default)]
pub struct Vocabulary {
    terms: HashMap<String, BTreeSet<DocId>>,
}

impl Vocabulary {
    pub fn add_term(&mut self, term: &str, doc_id: DocId) {
        match self.terms.get_mut(term) {
            Some(ids) => {
                ids.insert(doc_id);
            }
            None => {
                self.terms.insert(term.to_string(), BTreeSet::from([doc_id]));
            }
        }
    }

    pub fn document_frequency(&self, term: &str) -> u32 {
        self.terms.get(term).map_or(0, |ids| ids.len() as u32)
    }

    pub fn document_ids(&self, term: &str) -> Option<&BTreeSet<DocId>> { self.terms.get(term) }

    /// Terms with their document sets, in lexicographic term order.
    pub fn sorted(&self) -> Vec<(&str, &BTreeSet<DocId>)> {
        let mut entries: Vec<_> = self.terms.iter().map(|(t, ids)| (t.as_str(), ids)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }
}

/// The documents of one batch plus their vocabulary.
#[derive(Debug, Default)]
pub struct Corpus {
    documents: BTreeMap<DocId, Document>,
    order: Vec<DocId>,
    vocabulary: Vocabulary,
}

impl Corpus {
    pub fn new() -> Self { Self::default() }

    /// Register `document` and all of its terms. Returns false (and keeps the
    /// earlier document) when the ID is already present.
    pub fn add_document(&mut self, document: Document) -> bool {
        let id = document.id();
        if self.documents.contains_key(&id) {
            tracing::warn!(doc_id = id, path = document.path(), "duplicate document id in batch, skipping");
            return false;
        }
        for term in document.terms() {
            self.vocabulary.add_term(term, id);
        }
        self.documents.insert(id, document);
        self.order.push(id);
        true
    }

    pub fn add_documents(&mut self, documents: impl IntoIterator<Item = Document>) {
        for doc in documents {
            self.add_document(doc);
        }
    }

    pub fn document(&self, id: DocId) -> Option<&Document> { self.documents.get(&id) }

    /// Documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.documents.get(id))
    }

    pub fn vocabulary(&self) -> &Vocabulary { &self.vocabulary }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    /// Drop every document and the vocabulary.
    pub fn clear(&mut self) {
        self.documents = BTreeMap::new();
        self.order = Vec::new();
        self.vocabulary = Vocabulary::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::document::{DocumentBuilder, FieldType};
    use crate::source::RawDocument;
    use crate::tokenizer::{StopWords, Tokenizer};
    use std::sync::Arc;

    fn doc(id: DocId, body: &str) -> Document {
        let builder = DocumentBuilder::new(Arc::new(Tokenizer::new(StopWords::none(), TokenizerConfig::default())));
        builder.build(&RawDocument { id, fields: vec![(FieldType::Body, body.into())] }, format!("{id}.json"))
    }

    #[test]
    fn vocabulary_tracks_sorted_doc_ids() {
        let mut corpus = Corpus::new();
        corpus.add_documents([doc(9, "dog bird"), doc(3, "cat dog cat")]);
        let vocab = corpus.vocabulary();
        assert_eq!(vocab.document_frequency("dog"), 2);
        assert_eq!(vocab.document_ids("dog").unwrap().iter().copied().collect::<Vec<_>>(), vec![3, 9]);
        let terms: Vec<&str> = vocab.sorted().into_iter().map(|(t, _)| t).collect();
        assert_eq!(terms, vec!["bird", "cat", "dog"]);
        let ids: Vec<DocId> = corpus.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![9, 3]);
    }

    #[test]
    fn clear_releases_everything() {
        let mut corpus = Corpus::new();
        assert!(corpus.add_document(doc(1, "alpha")));
        assert!(!corpus.add_document(doc(1, "beta")));
        assert_eq!(corpus.vocabulary().document_frequency("beta"), 0);
        corpus.clear();
        assert!(corpus.is_empty());
        assert!(corpus.vocabulary().is_empty());
    }
}
