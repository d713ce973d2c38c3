use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::index::DocId;
use crate::source::RawDocument;
use crate::tokenizer::Tokenizer;

/// Fixed set of document fields. The discriminant is the wire code used in
/// positional postings, and also the order positions are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Title = 0,
    Abstract = 1,
    Body = 2,
    Author = 3,
    Category = 4,
    Journal = 5,
    Publisher = 6,
}

impl FieldType {
    pub const ALL: [FieldType; 7] = [
        FieldType::Title,
        FieldType::Abstract,
        FieldType::Body,
        FieldType::Author,
        FieldType::Category,
        FieldType::Journal,
        FieldType::Publisher,
    ];

    pub fn code(self) -> u8 { self as u8 }

    pub fn from_code(code: u8) -> Option<Self> { Self::ALL.get(code as usize).copied() }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Title => "title",
            FieldType::Abstract => "abstract",
            FieldType::Body => "body",
            FieldType::Author => "author",
            FieldType::Category => "category",
            FieldType::Journal => "journal",
            FieldType::Publisher => "publisher",
        };
        f.write_str(name)
    }
}

/// Term positions within one field's token stream.
#[derive(Debug, Clone, Default)]
pub struct Field {
    positions: HashMap<String, Vec<u32>>,
}

impl Field {
    /// Positions of `term`, ascending.
    pub fn positions(&self, term: &str) -> Option<&[u32]> {
        self.positions.get(term).map(|v| v.as_slice())
    }

    pub fn term_frequency(&self, term: &str) -> u32 {
        self.positions.get(term).map_or(0, |v| v.len() as u32)
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> { self.positions.keys().map(|s| s.as_str()) }

    fn record(&mut self, term: String, position: u32) {
        // Positions arrive in increasing order, so pushing keeps them sorted.
        self.positions.entry(term).or_default().push(position);
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocId,
    path: String,
    fields: BTreeMap<FieldType, Field>,
    tf: HashMap<String, u32>,
    length: u64,
    max_freq: u32,
}

impl Document {
    pub fn id(&self) -> DocId { self.id }

    pub fn path(&self) -> &str { &self.path }

    pub fn field(&self, field: FieldType) -> Option<&Field> { self.fields.get(&field) }

    /// Aggregate frequency of `term` across all fields.
    pub fn term_frequency(&self, term: &str) -> u32 { self.tf.get(term).copied().unwrap_or(0) }

    pub fn term_frequencies(&self) -> &HashMap<String, u32> { &self.tf }

    pub fn terms(&self) -> impl Iterator<Item = &str> { self.tf.keys().map(|s| s.as_str()) }

    /// Sum of all term frequencies.
    pub fn length(&self) -> u64 { self.length }

    pub fn max_frequency(&self) -> u32 { self.max_freq }

    /// `(field_code, position)` pairs for `term`, field by field in code order.
    pub fn positions(&self, term: &str) -> Vec<(u8, u32)> {
        let mut out = Vec::new();
        for (field_type, field) in &self.fields {
            if let Some(positions) = field.positions(term) {
                out.extend(positions.iter().map(|&p| (field_type.code(), p)));
            }
        }
        out
    }
}

/// Builds [`Document`]s from raw field text.
#[derive(Clone)]
pub struct DocumentBuilder {
    tokenizer: Arc<Tokenizer>,
}

impl DocumentBuilder {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self { Self { tokenizer } }

    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    pub fn build(&self, raw: &RawDocument, path: impl Into<String>) -> Document {
        let mut fields = BTreeMap::new();
        let mut tf: HashMap<String, u32> = HashMap::new();

        for (field_type, text) in &raw.fields {
            let field: &mut Field = fields.entry(*field_type).or_default();
            // Repeated field types continue the same position counter.
            let mut position = field.positions.values().map(|v| v.len() as u32).sum::<u32>();
            for term in self.tokenizer.terms(text) {
                *tf.entry(term.clone()).or_insert(0) += 1;
                field.record(term, position);
                position += 1;
            }
        }

        let length = tf.values().map(|&f| f as u64).sum();
        let max_freq = tf.values().copied().max().unwrap_or(0);
        Document { id: raw.id, path: path.into(), fields, tf, length, max_freq }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::tokenizer::StopWords;

    fn builder() -> DocumentBuilder {
        DocumentBuilder::new(Arc::new(Tokenizer::new(StopWords::from_words(["the"]), TokenizerConfig::default())))
    }

    #[test]
    fn aggregates_across_fields() {
        let raw = RawDocument {
            id: 7,
            fields: vec![
                (FieldType::Title, "Cat facts".into()),
                (FieldType::Body, "the cat sat, the cat ran".into()),
            ],
        };
        let doc = builder().build(&raw, "/docs/7.json");
        assert_eq!(doc.id(), 7);
        assert_eq!(doc.term_frequency("cat"), 3);
        assert_eq!(doc.length(), 6);
        assert_eq!(doc.max_frequency(), 3);
        assert_eq!(doc.field(FieldType::Body).unwrap().positions("cat"), Some(&[0u32, 2][..]));
        assert_eq!(doc.positions("cat"), vec![(0, 0), (2, 0), (2, 2)]);
    }

    #[test]
    fn empty_document_has_zero_scalars() {
        let raw = RawDocument { id: 1, fields: vec![(FieldType::Body, "the".into())] };
        let doc = builder().build(&raw, "x");
        assert_eq!(doc.length(), 0);
        assert_eq!(doc.max_frequency(), 0);
    }

    #[test]
    fn field_codes_round_trip() {
        for f in FieldType::ALL {
            assert_eq!(FieldType::from_code(f.code()), Some(f));
        }
        assert_eq!(FieldType::from_code(7), None);
    }
}
