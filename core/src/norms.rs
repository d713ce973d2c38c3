//! Per-document vector norms.
//!
//! `norm(d) = sqrt(sum_t (tf(t,d) * idf(t))^2) / maxFreq(d)`, appended as the
//! last column of every DocumentMeta line.

use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::IdfMode;
use crate::error::{IoContext, Result};
use crate::index::{DocId, Posting, VocabEntry};
use crate::persist::{read_document_records, tmp_path, CountingWriter, IndexPaths, PostingReader, VocabularyReader};

const DEFAULT_CHUNK: usize = 4096;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormSummary {
    pub documents: u64,
    pub terms: u64,
    pub avg_doc_len: f64,
    /// Posting lines that could not be parsed.
    pub skipped_postings: u64,
}

pub struct NormCalculator {
    paths: IndexPaths,
    idf: IdfMode,
    chunk_size: usize,
}

/// Squared weight sums of one rayon worker, with its own postings handle.
struct NormPartial {
    postings: PathBuf,
    reader: Option<PostingReader>,
    sums: HashMap<DocId, f64>,
    skipped: u64,
}

impl NormPartial {
    fn new(postings: &Path) -> Self {
        Self { postings: postings.to_path_buf(), reader: None, sums: HashMap::new(), skipped: 0 }
    }

    fn add_term(mut self, entry: &VocabEntry, num_docs: u64, idf: IdfMode) -> Result<Self> {
        if self.reader.is_none() {
            self.reader = Some(PostingReader::open(&self.postings)?);
        }
        let Some(reader) = self.reader.as_mut() else { return Ok(self) };
        let idf = idf.idf(num_docs, entry.df);
        let (sums, skipped) = (&mut self.sums, &mut self.skipped);
        reader.read_run(entry.offset, entry.df, |line| match Posting::parse_head(line) {
            Some((doc_id, tf)) => {
                let w = tf as f64 * idf;
                *sums.entry(doc_id).or_insert(0.0) += w * w;
            }
            None => {
                tracing::warn!(term = %entry.term, content = line, "skipping corrupt posting line");
                *skipped += 1;
            }
        })?;
        Ok(self)
    }
}

fn combine(mut a: (HashMap<DocId, f64>, u64), b: (HashMap<DocId, f64>, u64)) -> (HashMap<DocId, f64>, u64) {
    if a.0.len() < b.0.len() {
        return combine(b, a);
    }
    for (doc, sum) in b.0 {
        *a.0.entry(doc).or_insert(0.0) += sum;
    }
    (a.0, a.1 + b.1)
}

impl NormCalculator {
    pub fn new(index_dir: impl AsRef<Path>, idf: IdfMode) -> Self {
        Self { paths: IndexPaths::new(index_dir), idf, chunk_size: DEFAULT_CHUNK }
    }

    /// Vocabulary entries handed to the thread pool at a time.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn run(&self) -> Result<NormSummary> {
        let start = Instant::now();
        let meta_path = self.paths.document_meta();
        let records = read_document_records(&meta_path, false)?;
        let num_docs = records.len() as u64;
        let postings = self.paths.postings();

        let mut sums: HashMap<DocId, f64> = HashMap::with_capacity(records.len());
        let mut skipped = 0u64;
        let mut terms = 0u64;
        let mut vocab = VocabularyReader::open(self.paths.vocabulary())?;
        loop {
            let chunk = vocab.by_ref().take(self.chunk_size).collect::<Result<Vec<_>>>()?;
            if chunk.is_empty() {
                break;
            }
            terms += chunk.len() as u64;
            let partial = chunk
                .par_iter()
                .try_fold(|| NormPartial::new(&postings), |acc, entry| acc.add_term(entry, num_docs, self.idf))
                .map(|p| p.map(|p| (p.sums, p.skipped)))
                .try_reduce(|| (HashMap::new(), 0), |a, b| Ok(combine(a, b)))?;
            let merged = combine((std::mem::take(&mut sums), skipped), partial);
            sums = merged.0;
            skipped = merged.1;
            tracing::debug!(terms, "norm accumulation progress");
        }

        let tmp = tmp_path(&meta_path);
        let mut out = CountingWriter::create(&tmp)?;
        let mut total_len = 0u64;
        for mut record in records {
            total_len += record.length;
            let sum = sums.get(&record.doc_id).copied().unwrap_or(0.0);
            record.norm = Some(if record.max_freq == 0 { 0.0 } else { sum.sqrt() / record.max_freq as f64 });
            out.write_line(&record.to_string())?;
        }
        out.finish()?;
        std::fs::rename(&tmp, &meta_path).at(&meta_path)?;

        let avg_doc_len = if num_docs == 0 { 0.0 } else { total_len as f64 / num_docs as f64 };
        tracing::info!(
            documents = num_docs,
            terms,
            skipped_postings = skipped,
            elapsed_s = start.elapsed().as_secs_f64(),
            "document norms written"
        );
        Ok(NormSummary { documents: num_docs, terms, avg_doc_len, skipped_postings: skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn index(dir: &Path, vocab: &str, postings: &str, meta: &str) {
        std::fs::write(dir.join("Vocabulary.txt"), vocab).unwrap();
        std::fs::write(dir.join("Postings.txt"), postings).unwrap();
        std::fs::write(dir.join("DocumentMeta.txt"), meta).unwrap();
    }

    #[test]
    fn norms_match_formula() {
        let dir = tempdir().unwrap();
        // doc1: "cat dog cat", doc2: "dog bird"
        index(
            dir.path(),
            "bird 1 0\ncat 1 10\ndog 2 24\n",
            "2 1 [2:1]\n1 2 [2:0,2:2]\n1 1 [2:1]\n2 1 [2:0]\n",
            "1 1.json 2 3\n2 2.json 1 2\n",
        );
        let summary = NormCalculator::new(dir.path(), IdfMode::Smoothed).with_chunk_size(2).run().unwrap();
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.terms, 3);
        assert!((summary.avg_doc_len - 2.5).abs() < 1e-12);

        let records = read_document_records(dir.path().join("DocumentMeta.txt"), true).unwrap();
        let (one, two) = (3f64.ln(), 2f64.ln());
        let expected1 = ((2.0 * one).powi(2) + two.powi(2)).sqrt() / 2.0;
        let expected2 = (one.powi(2) + two.powi(2)).sqrt();
        assert!((records[0].norm.unwrap() - expected1).abs() < 1e-9);
        assert!((records[1].norm.unwrap() - expected2).abs() < 1e-9);
    }

    #[test]
    fn zero_max_freq_gives_zero_norm_and_corrupt_lines_are_skipped() {
        let dir = tempdir().unwrap();
        index(dir.path(), "x 2 0\n", "1 1 []\nbogus\n", "1 a 1 1\n2 b 0 0\n");
        let summary = NormCalculator::new(dir.path(), IdfMode::Plain).run().unwrap();
        assert_eq!(summary.skipped_postings, 1);
        let records = read_document_records(dir.path().join("DocumentMeta.txt"), true).unwrap();
        assert_eq!(records[1].norm, Some(0.0));
        // Plain idf of a term in every document is zero.
        assert_eq!(records[0].norm, Some(0.0));
    }
}
