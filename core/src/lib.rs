//! Batch inverted-index construction and ranked retrieval.
//!
//! Documents are tokenized into per-batch corpora, flushed as sorted
//! vocabulary/postings files, merged into one global index, finalized with
//! per-document vector norms and then queried through a vocabulary trie with
//! either the vector space model or Okapi BM25.

pub mod config;
pub mod corpus;
pub mod document;
pub mod error;
pub mod index;
pub mod merge;
pub mod norms;
pub mod persist;
pub mod pipeline;
pub mod retrieval;
pub mod source;
pub mod tokenizer;
pub mod trie;

pub use config::{IdfMode, IndexerConfig, TokenizerConfig};
pub use error::{Error, Result};
pub use index::{DocId, DocumentRecord, Posting, VocabEntry};
