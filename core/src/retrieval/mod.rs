//! Query evaluation against a finalized index.

pub mod bm25;
pub mod expansion;
pub mod vsm;

use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use crate::error::{Error, IoContext, Result};
use crate::index::{DocId, DocumentRecord, Posting};
use crate::persist::{load_manifest, read_document_records, IndexManifest, IndexPaths, PostingReader};
use crate::tokenizer::Tokenizer;
use crate::trie::{TermInfo, VocabularyTrie};

pub use expansion::QueryExpander;

pub const DEFAULT_TOP_K: usize = 1000;

/// A tokenized query: distinct terms weighted by `tf / max tf`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    id: String,
    text: String,
    terms: BTreeMap<String, f64>,
}

impl Query {
    pub fn new(id: impl Into<String>, text: &str, tokenizer: &Tokenizer) -> Self {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for term in tokenizer.terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }
        let max = counts.values().copied().max().unwrap_or(1) as f64;
        let terms = counts.into_iter().map(|(t, c)| (t, c as f64 / max)).collect();
        Self { id: id.into(), text: text.trim().to_string(), terms }
    }

    pub fn id(&self) -> &str { &self.id }

    pub fn text(&self) -> &str { &self.text }

    /// `(term, normalized weight)` in term order.
    pub fn terms(&self) -> impl Iterator<Item = (&str, f64)> {
        self.terms.iter().map(|(t, w)| (t.as_str(), *w))
    }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }
}

/// One query per non-empty line, numbered from 1.
pub fn read_queries(path: impl AsRef<Path>, tokenizer: &Tokenizer) -> Result<Vec<Query>> {
    let path = path.as_ref();
    let file = File::open(path).at(path)?;
    let mut queries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.at(path)?;
        if line.trim().is_empty() {
            continue;
        }
        queries.push(Query::new((queries.len() + 1).to_string(), &line, tokenizer));
    }
    Ok(queries)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedDoc {
    pub rank: usize,
    pub doc_id: DocId,
    pub score: f64,
}

/// Read-only view of a finalized index: vocabulary trie, document table and
/// collection statistics. Postings stay on disk.
pub struct QueryEngine {
    paths: IndexPaths,
    manifest: IndexManifest,
    trie: VocabularyTrie,
    documents: HashMap<DocId, DocumentRecord>,
    avg_doc_len: f64,
}

impl QueryEngine {
    pub fn open(index_dir: impl AsRef<Path>) -> Result<Self> {
        let start = Instant::now();
        let paths = IndexPaths::new(index_dir);
        let manifest = load_manifest(&paths)?;
        let trie = VocabularyTrie::load(paths.vocabulary())?;
        let records = read_document_records(paths.document_meta(), true)?;
        let total_len: u64 = records.iter().map(|r| r.length).sum();
        let avg_doc_len = if records.is_empty() { 1.0 } else { total_len as f64 / records.len() as f64 };
        let documents: HashMap<DocId, DocumentRecord> = records.into_iter().map(|r| (r.doc_id, r)).collect();
        tracing::info!(
            index = %paths.root.display(),
            docs = documents.len(),
            terms = trie.len(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "index opened"
        );
        Ok(Self { paths, manifest, trie, documents, avg_doc_len })
    }

    pub fn manifest(&self) -> &IndexManifest { &self.manifest }

    pub fn num_docs(&self) -> u64 { self.documents.len() as u64 }

    pub fn avg_doc_len(&self) -> f64 { self.avg_doc_len }

    pub fn document(&self, doc_id: DocId) -> Option<&DocumentRecord> { self.documents.get(&doc_id) }

    pub fn term_info(&self, term: &str) -> Option<TermInfo> { self.trie.lookup(term) }

    pub fn index_dir(&self) -> &Path { &self.paths.root }

    /// A fresh postings handle; one per evaluation so queries can run
    /// concurrently.
    pub fn postings(&self) -> Result<PostingReader> { PostingReader::open(self.paths.postings()) }

    /// Call `f(doc_id, tf)` for every posting of `term`. Corrupt lines are
    /// logged and skipped.
    pub fn for_each_posting(
        &self,
        reader: &mut PostingReader,
        term: &str,
        info: TermInfo,
        mut f: impl FnMut(DocId, u32),
    ) -> Result<()> {
        reader.read_run(info.offset, info.df, |line| match Posting::parse_head(line) {
            Some((doc_id, tf)) => f(doc_id, tf),
            None => tracing::warn!(term, content = line, "skipping corrupt posting line"),
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalModel {
    #[default]
    VectorSpace,
    OkapiBm25,
}

impl RetrievalModel {
    pub fn name(self) -> &'static str {
        match self {
            RetrievalModel::VectorSpace => "vsm",
            RetrievalModel::OkapiBm25 => "bm25",
        }
    }

    /// Top `DEFAULT_TOP_K` documents by descending score.
    pub fn evaluate(self, query: &Query, engine: &QueryEngine) -> Result<Vec<ScoredDoc>> {
        self.evaluate_top(query, engine, DEFAULT_TOP_K)
    }

    pub fn evaluate_top(self, query: &Query, engine: &QueryEngine, k: usize) -> Result<Vec<ScoredDoc>> {
        let start = Instant::now();
        let hits = match self {
            RetrievalModel::VectorSpace => vsm::evaluate(query, engine, k)?,
            RetrievalModel::OkapiBm25 => bm25::evaluate(query, engine, k)?,
        };
        tracing::debug!(
            query_id = query.id(),
            model = self.name(),
            hits = hits.len(),
            elapsed_s = start.elapsed().as_secs_f64(),
            "query evaluated"
        );
        Ok(hits)
    }
}

impl fmt::Display for RetrievalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for RetrievalModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vsm" | "vector" | "vectorspace" => Ok(RetrievalModel::VectorSpace),
            "bm25" | "okapi" | "okapibm25" => Ok(RetrievalModel::OkapiBm25),
            other => Err(Error::Config(format!("unknown retrieval model {other:?} (expected vsm or bm25)"))),
        }
    }
}

/// Per-document score sums that remember first-seen order.
#[derive(Debug, Default)]
pub(crate) struct Accumulator {
    slots: HashMap<DocId, usize>,
    entries: Vec<(DocId, f64)>,
}

impl Accumulator {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self { slots: HashMap::with_capacity(n), entries: Vec::with_capacity(n) }
    }

    pub(crate) fn add(&mut self, doc_id: DocId, delta: f64) {
        match self.slots.get(&doc_id) {
            Some(&slot) => self.entries[slot].1 += delta,
            None => {
                self.slots.insert(doc_id, self.entries.len());
                self.entries.push((doc_id, delta));
            }
        }
    }

    pub(crate) fn into_entries(self) -> Vec<(DocId, f64)> { self.entries }
}

struct HeapEntry {
    score: f64,
    seq: usize,
    doc_id: DocId,
}

impl Ord for HeapEntry {
    /// Higher score first; among equal scores the earlier one wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for HeapEntry {}

/// Best `k` of `scores` (in first-seen order) by descending score, keeping a
/// bounded min-heap. The minimum is replaced only by a strictly higher score.
pub fn top_k(scores: impl IntoIterator<Item = (DocId, f64)>, k: usize) -> Vec<ScoredDoc> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::with_capacity(k + 1);
    for (seq, (doc_id, score)) in scores.into_iter().enumerate() {
        if heap.len() < k {
            heap.push(Reverse(HeapEntry { score, seq, doc_id }));
        } else if heap.peek().is_some_and(|Reverse(min)| score > min.score) {
            heap.pop();
            heap.push(Reverse(HeapEntry { score, seq, doc_id }));
        }
    }
    // Ascending `Reverse` order is descending entry order.
    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse(e)| ScoredDoc { doc_id: e.doc_id, score: e.score })
        .collect()
}

/// Competition ranking of hits already sorted by descending score: equal
/// scores share a rank and the next distinct score takes its position.
pub fn rank(hits: &[ScoredDoc]) -> Vec<RankedDoc> {
    let mut out = Vec::with_capacity(hits.len());
    let mut current = 0;
    for (i, hit) in hits.iter().enumerate() {
        if i == 0 || hit.score != hits[i - 1].score {
            current = i + 1;
        }
        out.push(RankedDoc { rank: current, doc_id: hit.doc_id, score: hit.score });
    }
    out
}

pub const RUN_HEADER: &str = "QUERY_ID\tPLACE_HOLDER\tDOC_ID\tRANK\tSCORE\tMODEL_USED";

/// Tab-separated run file, one line per ranked hit.
pub struct RunWriter<W: Write> {
    label: PathBuf,
    inner: W,
}

impl RunWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).at(path)?;
        Self::new(BufWriter::new(file), path)
    }
}

impl<W: Write> RunWriter<W> {
    /// Wrap `inner` and write the header line. `label` names the sink in errors.
    pub fn new(mut inner: W, label: impl AsRef<Path>) -> Result<Self> {
        let label = label.as_ref().to_path_buf();
        writeln!(inner, "{RUN_HEADER}").at(&label)?;
        Ok(Self { label, inner })
    }

    pub fn write_query(&mut self, query_id: &str, hits: &[RankedDoc], model: RetrievalModel) -> Result<()> {
        for hit in hits {
            writeln!(self.inner, "{query_id}\t0\t{}\t{}\t{:.6}\t{model}", hit.doc_id, hit.rank, hit.score)
                .at(&self.label)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush().at(&self.label)?;
        Ok(self.inner)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::QueryEngine;
    use crate::config::{IdfMode, TokenizerConfig};
    use crate::corpus::Corpus;
    use crate::document::DocumentBuilder;
    use crate::merge::merge_index;
    use crate::norms::NormCalculator;
    use crate::persist::{now_rfc3339, save_manifest, write_batch, IndexManifest, IndexPaths, MANIFEST_VERSION};
    use crate::source::{DocumentSource, JsonDocumentSource};
    use crate::tokenizer::{StopWords, Tokenizer};
    use std::path::Path;
    use std::sync::Arc;

    pub(crate) fn tokenizer() -> Tokenizer {
        Tokenizer::new(StopWords::none(), TokenizerConfig::default())
    }

    /// Finalized single-batch index over `(id, body)` documents, each also
    /// saved as `docs/{id}.json`.
    pub(crate) fn build(dir: &Path, docs: &[(u64, &str)], idf: IdfMode) -> QueryEngine {
        let builder = DocumentBuilder::new(Arc::new(tokenizer()));
        let doc_dir = dir.join("docs");
        std::fs::create_dir_all(&doc_dir).unwrap();
        let mut corpus = Corpus::new();
        for (id, body) in docs {
            let path = doc_dir.join(format!("{id}.json"));
            std::fs::write(&path, serde_json::json!({ "id": id, "body": body }).to_string()).unwrap();
            let raw = JsonDocumentSource.load(&path).unwrap();
            corpus.add_document(builder.build(&raw, path.display().to_string()));
        }
        let index = dir.join("index");
        let batch = write_batch(&corpus, 0, &index.join("batches")).unwrap();
        let merged = merge_index(&[batch], &index).unwrap();
        let norms = NormCalculator::new(&index, idf).run().unwrap();
        let manifest = IndexManifest {
            num_docs: norms.documents,
            num_terms: merged.terms,
            avg_doc_len: norms.avg_doc_len,
            idf,
            tokenizer: TokenizerConfig::default(),
            stop_words: Some(Vec::new()),
            created_at: now_rfc3339(),
            version: MANIFEST_VERSION,
        };
        save_manifest(&IndexPaths::new(&index), &manifest).unwrap();
        QueryEngine::open(&index).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::tokenizer::StopWords;

    #[test]
    fn query_weights_are_normalized_by_max_tf() {
        let tokenizer = Tokenizer::new(StopWords::none(), TokenizerConfig::default());
        let q = Query::new("1", "Cat cat dog", &tokenizer);
        let terms: Vec<_> = q.terms().collect();
        assert_eq!(terms, vec![("cat", 1.0), ("dog", 0.5)]);
        assert!(Query::new("2", "  ", &tokenizer).is_empty());
    }

    #[test]
    fn top_k_keeps_best_and_first_seen_on_ties() {
        let scores = vec![(1, 0.5), (2, 0.9), (3, 0.5), (4, 0.1), (5, 0.9)];
        let top = top_k(scores.clone(), 3);
        let ids: Vec<_> = top.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![2, 5, 1]);
        assert_eq!(top_k(scores, 0), vec![]);
    }

    #[test]
    fn ties_share_a_rank() {
        let hits = [
            ScoredDoc { doc_id: 7, score: 2.0 },
            ScoredDoc { doc_id: 3, score: 1.0 },
            ScoredDoc { doc_id: 9, score: 1.0 },
            ScoredDoc { doc_id: 1, score: 0.5 },
        ];
        let ranks: Vec<_> = rank(&hits).iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
    }

    #[test]
    fn accumulator_remembers_first_seen_order() {
        let mut acc = Accumulator::with_capacity(4);
        acc.add(9, 1.0);
        acc.add(2, 1.0);
        acc.add(9, 0.5);
        assert_eq!(acc.into_entries(), vec![(9, 1.5), (2, 1.0)]);
    }

    #[test]
    fn run_lines_have_six_columns() {
        let mut run = RunWriter::new(Vec::new(), "memory").unwrap();
        let hits = rank(&[ScoredDoc { doc_id: 42, score: 1.0 / 3.0 }]);
        run.write_query("7", &hits, RetrievalModel::OkapiBm25).unwrap();
        let text = String::from_utf8(run.finish().unwrap()).unwrap();
        assert_eq!(text, format!("{RUN_HEADER}\n7\t0\t42\t1\t0.333333\tbm25\n"));
    }

    #[test]
    fn model_names_parse() {
        assert_eq!("BM25".parse::<RetrievalModel>().unwrap(), RetrievalModel::OkapiBm25);
        assert_eq!("vsm".parse::<RetrievalModel>().unwrap(), RetrievalModel::VectorSpace);
        assert!("lsi".parse::<RetrievalModel>().is_err());
    }
}
