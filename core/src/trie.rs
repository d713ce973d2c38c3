use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, IoContext, Result};
use crate::index::VocabEntry;
use crate::persist::IO_BUFFER;

/// Document frequency and postings offset of a vocabulary term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermInfo {
    pub df: u32,
    pub offset: u64,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    info: Option<TermInfo>,
}

/// Prefix tree over vocabulary terms; lookups cost O(term length).
///
/// Keys are letters (case-folded) and digits. Any other character is rejected.
#[derive(Debug, Default)]
pub struct VocabularyTrie {
    root: TrieNode,
    len: usize,
}

fn normalize_into(term: &str, out: &mut Vec<char>) -> Result<()> {
    out.clear();
    for c in term.chars() {
        if c.is_alphabetic() {
            out.extend(c.to_lowercase());
        } else if c.is_numeric() {
            out.push(c);
        } else {
            return Err(Error::InvalidTermChar { term: term.to_string(), ch: c });
        }
    }
    Ok(())
}

impl VocabularyTrie {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, term: &str, info: TermInfo) -> Result<()> {
        let mut key = Vec::with_capacity(term.len());
        normalize_into(term, &mut key)?;
        let mut node = &mut self.root;
        for c in key {
            node = node.children.entry(c).or_default();
        }
        if node.info.replace(info).is_none() {
            self.len += 1;
        }
        Ok(())
    }

    /// `Ok(None)` when the term is absent, `Err` when it holds characters
    /// that can never be in the vocabulary.
    pub fn get(&self, term: &str) -> Result<Option<TermInfo>> {
        let mut key = Vec::with_capacity(term.len());
        normalize_into(term, &mut key)?;
        let mut node = &self.root;
        for c in key {
            match node.children.get(&c) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(node.info)
    }

    /// Lookup that treats invalid terms as absent.
    pub fn lookup(&self, term: &str) -> Option<TermInfo> { self.get(term).ok().flatten() }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Build from a vocabulary file. Malformed lines and terms with invalid
    /// characters are logged and skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).at(path)?;
        let mut trie = Self::new();
        let mut skipped = 0usize;
        for (i, line) in BufReader::with_capacity(IO_BUFFER, file).lines().enumerate() {
            let line = line.at(path)?;
            let Some(entry) = VocabEntry::parse(&line) else {
                tracing::warn!(path = %path.display(), line = i + 1, content = %line, "invalid vocabulary line");
                skipped += 1;
                continue;
            };
            if let Err(e) = trie.insert(&entry.term, TermInfo { df: entry.df, offset: entry.offset }) {
                tracing::warn!(line = i + 1, error = %e, "invalid vocabulary term");
                skipped += 1;
            }
        }
        tracing::info!(path = %path.display(), terms = trie.len(), skipped, "vocabulary trie loaded");
        Ok(trie)
    }
}
