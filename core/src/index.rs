//! Line formats of the on-disk index files.
//!
//! - Vocabulary: `term df offset`
//! - Postings: `docId tf [fieldCode:pos,fieldCode:pos,...]`
//! - DocumentMeta: `docId path maxFreq length [norm]`

use serde::{Deserialize, Serialize};
use std::fmt;

pub type DocId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabEntry {
    pub term: String,
    pub df: u32,
    /// Byte offset of the term's first posting line.
    pub offset: u64,
}

impl VocabEntry {
    pub fn new(term: impl Into<String>, df: u32, offset: u64) -> Self {
        Self { term: term.into(), df, offset }
    }

    /// Parse one vocabulary line. `None` on wrong field count or bad numbers.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_ascii_whitespace();
        let term = parts.next()?;
        let df = parts.next()?.parse().ok()?;
        let offset = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(term, df, offset))
    }
}

impl fmt::Display for VocabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.term, self.df, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
    /// `(field_code, position)` pairs.
    pub positions: Vec<(u8, u32)>,
}

impl Posting {
    /// Document ID and term frequency only, without decoding positions.
    pub fn parse_head(line: &str) -> Option<(DocId, u32)> {
        let mut parts = line.splitn(3, ' ');
        let doc_id = parts.next()?.parse().ok()?;
        let tf = parts.next()?.trim_end().parse().ok()?;
        Some((doc_id, tf))
    }

    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        let mut parts = line.splitn(3, ' ');
        let doc_id = parts.next()?.parse().ok()?;
        let tf = parts.next()?.parse().ok()?;
        let payload = parts.next()?;
        let inner = payload.strip_prefix('[')?.strip_suffix(']')?;
        let mut positions = Vec::new();
        if !inner.is_empty() {
            for pair in inner.split(',') {
                let (field, pos) = pair.split_once(':')?;
                positions.push((field.parse().ok()?, pos.parse().ok()?));
            }
        }
        Some(Self { doc_id, tf, positions })
    }
}

impl fmt::Display for Posting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [", self.doc_id, self.tf)?;
        for (i, (field, pos)) in self.positions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}:{pos}")?;
        }
        f.write_str("]")
    }
}

/// One DocumentMeta line. `norm` is present only once the index is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: DocId,
    pub path: String,
    pub max_freq: u32,
    pub length: u64,
    pub norm: Option<f64>,
}

impl DocumentRecord {
    /// Parse a line; `with_norm` selects the finalized layout. The path may
    /// contain spaces, so numeric fields are taken from the right.
    pub fn parse(line: &str, with_norm: bool) -> Option<Self> {
        let line = line.trim_end();
        let (id, rest) = line.split_once(' ')?;
        let doc_id = id.parse().ok()?;
        let mut tail = rest.rsplitn(if with_norm { 4 } else { 3 }, ' ');
        let norm = if with_norm { Some(tail.next()?.parse().ok()?) } else { None };
        let length = tail.next()?.parse().ok()?;
        let max_freq = tail.next()?.parse().ok()?;
        let path = tail.next()?.to_string();
        Some(Self { doc_id, path, max_freq, length, norm })
    }
}

impl fmt::Display for DocumentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.doc_id, self.path, self.max_freq, self.length)?;
        if let Some(norm) = self.norm {
            write!(f, " {norm}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocab_entry_rejects_bad_lines() {
        assert_eq!(VocabEntry::parse("dog 2 17"), Some(VocabEntry::new("dog", 2, 17)));
        assert_eq!(VocabEntry::parse("dog 2"), None);
        assert_eq!(VocabEntry::parse("dog x 17"), None);
        assert_eq!(VocabEntry::parse("dog 2 17 9"), None);
    }

    #[test]
    fn posting_formats_positions() {
        let p = Posting { doc_id: 4, tf: 2, positions: vec![(0, 1), (2, 7)] };
        assert_eq!(p.to_string(), "4 2 [0:1,2:7]");
        assert_eq!(Posting::parse("4 2 [0:1,2:7]\n"), Some(p));
        let empty = Posting { doc_id: 1, tf: 0, positions: vec![] };
        assert_eq!(empty.to_string(), "1 0 []");
        assert_eq!(Posting::parse_head("12 3 [2:0]"), Some((12, 3)));
        assert_eq!(Posting::parse_head("garbage"), None);
    }

    #[test]
    fn document_record_with_spaces_in_path() {
        let rec = DocumentRecord::parse("5 /my docs/a b.json 3 10", false).unwrap();
        assert_eq!(rec.path, "/my docs/a b.json");
        assert_eq!(rec.max_freq, 3);
        assert_eq!(rec.length, 10);
        let finalized = DocumentRecord { norm: Some(0.5), ..rec };
        let parsed = DocumentRecord::parse(&finalized.to_string(), true).unwrap();
        assert_eq!(parsed, finalized);
    }
}
