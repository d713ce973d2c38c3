//! N-way merge of per-batch vocabulary/postings pairs.
//!
//! One cursor per batch vocabulary yields terms in increasing order. The
//! smallest term across cursors is taken from a min-heap; its posting runs are
//! copied byte-for-byte into the merged postings file and a vocabulary entry
//! with the new offset (and summed df) is written. Runs from several batches
//! are ordered by their first document ID. Whole runs are never interleaved,
//! which assumes batches cover disjoint document ID ranges.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use crate::error::{Error, IoContext, Result};
use crate::index::VocabEntry;
use crate::persist::{BatchFiles, CountingWriter, IndexPaths, PostingReader, VocabularyReader, IO_BUFFER};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub batches: usize,
    pub terms: u64,
    pub documents: u64,
    pub postings_bytes: u64,
}

struct BatchCursor {
    vocab: VocabularyReader,
    postings: PostingReader,
    postings_len: u64,
    current: Option<VocabEntry>,
    next: Option<VocabEntry>,
    line: usize,
}

impl BatchCursor {
    fn open(files: &BatchFiles) -> Result<Self> {
        let postings = PostingReader::open(&files.postings)?;
        let mut cursor = Self {
            vocab: VocabularyReader::open(&files.vocabulary)?,
            postings_len: postings.file_len()?,
            postings,
            current: None,
            next: None,
            line: 0,
        };
        cursor.next = cursor.vocab.next().transpose()?;
        cursor.advance()?;
        Ok(cursor)
    }

    fn malformed(&self, line: usize, entry: &VocabEntry) -> Error {
        Error::MalformedVocabulary {
            path: self.vocab.path().to_path_buf(),
            line,
            content: entry.to_string(),
        }
    }

    /// Move to the next entry, checking term order and that the run lies
    /// inside the postings file.
    fn advance(&mut self) -> Result<()> {
        self.current = self.next.take();
        let Some(current) = &self.current else { return Ok(()) };
        self.line += 1;
        self.next = self.vocab.next().transpose()?;
        if let Some(next) = &self.next {
            if next.term <= current.term || next.offset < current.offset {
                return Err(self.malformed(self.line + 1, next));
            }
        }
        if current.offset > self.postings_len || self.run_end() > self.postings_len {
            return Err(self.malformed(self.line, current));
        }
        Ok(())
    }

    /// End of the current run: the next entry's offset, or end of file.
    fn run_end(&self) -> u64 {
        self.next.as_ref().map_or(self.postings_len, |n| n.offset)
    }

    /// Sort key among cursors sharing a term. An unreadable leading ID sorts
    /// last rather than aborting the merge.
    fn leading_doc_id(&mut self) -> Result<u64> {
        let Some(entry) = &self.current else { return Ok(u64::MAX) };
        let offset = entry.offset;
        let id = self.postings.first_doc_id(offset)?;
        Ok(id.unwrap_or_else(|| {
            tracing::warn!(path = %self.postings.path().display(), offset, "cannot read leading document id of posting run");
            u64::MAX
        }))
    }
}

/// Merge `batches` into `Vocabulary.txt`, `Postings.txt` and `DocumentMeta.txt`
/// under `out_dir`.
pub fn merge_index(batches: &[BatchFiles], out_dir: &Path) -> Result<MergeSummary> {
    let start = Instant::now();
    std::fs::create_dir_all(out_dir).at(out_dir)?;
    let paths = IndexPaths::new(out_dir);

    let mut ordered: Vec<&BatchFiles> = batches.iter().collect();
    ordered.sort_by_key(|b| b.batch_no);

    let mut summary = merge_vocabulary_and_postings(&ordered, &paths.vocabulary(), &paths.postings())?;
    summary.documents = concat_document_meta(&ordered, &paths.document_meta())?;
    summary.batches = ordered.len();
    tracing::info!(
        batches = summary.batches,
        terms = summary.terms,
        documents = summary.documents,
        elapsed_s = start.elapsed().as_secs_f64(),
        "merged partial indexes"
    );
    Ok(summary)
}

fn merge_vocabulary_and_postings(batches: &[&BatchFiles], vocab_out: &Path, postings_out: &Path) -> Result<MergeSummary> {
    let mut cursors = batches.iter().map(|b| BatchCursor::open(b)).collect::<Result<Vec<_>>>()?;
    let mut vocab = CountingWriter::create(vocab_out)?;
    let mut postings = CountingWriter::create(postings_out)?;
    let mut buf = vec![0u8; IO_BUFFER];
    let mut terms = 0u64;

    let mut heap: BinaryHeap<Reverse<(String, usize)>> = cursors
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.current.as_ref().map(|e| Reverse((e.term.clone(), i))))
        .collect();

    let mut holders: Vec<usize> = Vec::with_capacity(cursors.len());
    while let Some(Reverse((term, first))) = heap.pop() {
        holders.clear();
        holders.push(first);
        while heap.peek().is_some_and(|Reverse((t, _))| *t == term) {
            if let Some(Reverse((_, i))) = heap.pop() {
                holders.push(i);
            }
        }

        if holders.len() > 1 {
            let mut keyed = Vec::with_capacity(holders.len());
            for &i in &holders {
                keyed.push((cursors[i].leading_doc_id()?, i));
            }
            // Cursor index breaks ties, keeping batch order.
            keyed.sort_unstable();
            holders.clear();
            holders.extend(keyed.into_iter().map(|(_, i)| i));
        }

        let offset = postings.position();
        let mut df = 0u32;
        for &i in &holders {
            let c = &mut cursors[i];
            let Some(entry) = &c.current else { continue };
            let (run_start, run_len) = (entry.offset, c.run_end() - entry.offset);
            df += entry.df;
            c.postings.copy_range(run_start, run_len, &mut postings, &mut buf)?;
        }
        vocab.write_line(&VocabEntry::new(term, df, offset).to_string())?;
        terms += 1;

        for &i in &holders {
            let c = &mut cursors[i];
            c.advance()?;
            if let Some(e) = &c.current {
                heap.push(Reverse((e.term.clone(), i)));
            }
        }
    }

    vocab.finish()?;
    let postings_bytes = postings.finish()?;
    Ok(MergeSummary { terms, postings_bytes, ..MergeSummary::default() })
}

/// Append every DocumentMeta file in batch order; returns the record count.
fn concat_document_meta(batches: &[&BatchFiles], out: &Path) -> Result<u64> {
    let mut writer = CountingWriter::create(out)?;
    let mut buf = vec![0u8; IO_BUFFER];
    let mut lines = 0u64;
    for batch in batches {
        let path = &batch.document_meta;
        let mut file = File::open(path).at(path)?;
        let mut last = b'\n';
        loop {
            let n = file.read(&mut buf).at(path)?;
            if n == 0 {
                break;
            }
            lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
            last = buf[n - 1];
            writer.write_bytes(&buf[..n])?;
        }
        if last != b'\n' {
            writer.write_bytes(b"\n")?;
            lines += 1;
        }
    }
    writer.finish()?;
    Ok(lines)
}

/// Delete merged batch files, then the batch directory if it is empty.
pub fn remove_batches(batches: &[BatchFiles], dir: &Path) {
    for b in batches {
        for p in [&b.vocabulary, &b.postings, &b.document_meta] {
            if let Err(e) = std::fs::remove_file(p) {
                tracing::warn!(path = %p.display(), error = %e, "cannot remove batch file");
            }
        }
    }
    let _ = std::fs::remove_dir(dir);
}
