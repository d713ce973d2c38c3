use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::{IdfMode, TokenizerConfig};
use crate::corpus::Corpus;
use crate::error::{Error, IoContext, Result};
use crate::index::{DocumentRecord, Posting, VocabEntry};
use crate::tokenizer::{StopWords, Tokenizer};

pub const VOCABULARY_FILE: &str = "Vocabulary.txt";
pub const POSTINGS_FILE: &str = "Postings.txt";
pub const DOCUMENT_META_FILE: &str = "DocumentMeta.txt";
pub const MANIFEST_FILE: &str = "meta.json";
pub const MANIFEST_VERSION: u32 = 1;

pub(crate) const IO_BUFFER: usize = 64 * 1024;

/// Written last; its presence marks a finalized index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub num_docs: u64,
    pub num_terms: u64,
    pub avg_doc_len: f64,
    pub idf: IdfMode,
    /// Query text must be tokenized the same way the documents were.
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    /// Stop words used at build time, sorted. Absent in older manifests.
    #[serde(default)]
    pub stop_words: Option<Vec<String>>,
    pub created_at: String,
    pub version: u32,
}

impl IndexManifest {
    /// A tokenizer equivalent to the one the index was built with. Manifests
    /// without a recorded stop-word list fall back to the English list.
    pub fn query_tokenizer(&self) -> Tokenizer {
        let stop_words = match &self.stop_words {
            Some(words) => StopWords::from_words(words),
            None => StopWords::english(),
        };
        Tokenizer::new(stop_words, self.tokenizer.clone())
    }
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn vocabulary(&self) -> PathBuf { self.root.join(VOCABULARY_FILE) }
    pub fn postings(&self) -> PathBuf { self.root.join(POSTINGS_FILE) }
    pub fn document_meta(&self) -> PathBuf { self.root.join(DOCUMENT_META_FILE) }
    pub fn manifest(&self) -> PathBuf { self.root.join(MANIFEST_FILE) }
    pub fn batch_dir(&self) -> PathBuf { self.root.join("batches") }
}

/// The three files one batch flushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFiles {
    pub batch_no: usize,
    pub vocabulary: PathBuf,
    pub postings: PathBuf,
    pub document_meta: PathBuf,
}

impl BatchFiles {
    pub fn in_dir(dir: &Path, batch_no: usize) -> Self {
        Self {
            batch_no,
            vocabulary: dir.join(format!("Vocabulary_Batch_{batch_no}.txt")),
            postings: dir.join(format!("Postings_Batch_{batch_no}.txt")),
            document_meta: dir.join(format!("DocumentMeta_Batch_{batch_no}.txt")),
        }
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Buffered writer that knows how many bytes went through it.
pub(crate) struct CountingWriter {
    path: PathBuf,
    inner: BufWriter<File>,
    written: u64,
}

impl CountingWriter {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).at(path)?;
        Ok(Self { path: path.to_path_buf(), inner: BufWriter::with_capacity(IO_BUFFER, file), written: 0 })
    }

    pub(crate) fn position(&self) -> u64 { self.written }

    pub(crate) fn write_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes()).at(&self.path)?;
        self.inner.write_all(b"\n").at(&self.path)?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).at(&self.path)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<u64> {
        self.inner.flush().at(&self.path)?;
        self.inner.get_ref().sync_all().at(&self.path)?;
        Ok(self.written)
    }
}

/// Serialize one batch: document meta in corpus order, then every term in
/// lexicographic order with its postings ascending by document ID. Files are
/// written under `.tmp` names and only renamed once fully flushed.
pub fn write_batch(corpus: &Corpus, batch_no: usize, dir: &Path) -> Result<BatchFiles> {
    create_dir_all(dir).at(dir)?;
    let files = BatchFiles::in_dir(dir, batch_no);
    let tmp_docs = tmp_path(&files.document_meta);
    let tmp_vocab = tmp_path(&files.vocabulary);
    let tmp_post = tmp_path(&files.postings);
    let mut renamed: Vec<&PathBuf> = Vec::with_capacity(3);

    let result = (|| -> Result<()> {
        let mut docs = CountingWriter::create(&tmp_docs)?;
        for doc in corpus.iter() {
            let record = DocumentRecord {
                doc_id: doc.id(),
                path: doc.path().to_string(),
                max_freq: doc.max_frequency(),
                length: doc.length(),
                norm: None,
            };
            docs.write_line(&record.to_string())?;
        }
        docs.finish()?;

        let mut vocab = CountingWriter::create(&tmp_vocab)?;
        let mut postings = CountingWriter::create(&tmp_post)?;
        for (term, doc_ids) in corpus.vocabulary().sorted() {
            let offset = postings.position();
            for &doc_id in doc_ids {
                let Some(doc) = corpus.document(doc_id) else { continue };
                let posting = Posting { doc_id, tf: doc.term_frequency(term), positions: doc.positions(term) };
                postings.write_line(&posting.to_string())?;
            }
            vocab.write_line(&VocabEntry::new(term, doc_ids.len() as u32, offset).to_string())?;
        }
        postings.finish()?;
        vocab.finish()?;

        for (tmp, dst) in [(&tmp_docs, &files.document_meta), (&tmp_post, &files.postings), (&tmp_vocab, &files.vocabulary)] {
            std::fs::rename(tmp, dst).at(dst)?;
            renamed.push(dst);
        }
        Ok(())
    })();

    if let Err(e) = result {
        // No partial batch may survive: drop temporaries and anything already renamed.
        for path in [&tmp_docs, &tmp_vocab, &tmp_post].into_iter().chain(renamed) {
            let _ = std::fs::remove_file(path);
        }
        return Err(e);
    }
    tracing::debug!(batch_no, terms = corpus.vocabulary().len(), docs = corpus.len(), "batch files written");
    Ok(files)
}

/// Strict reader over a vocabulary file: any malformed line is an error.
pub struct VocabularyReader {
    path: PathBuf,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
}

impl VocabularyReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).at(&path)?;
        Ok(Self { lines: BufReader::with_capacity(IO_BUFFER, file).lines(), path, line_no: 0 })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl Iterator for VocabularyReader {
    type Item = Result<VocabEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(line) => line,
            Err(e) => return Some(Err(Error::io(&self.path, e))),
        };
        self.line_no += 1;
        Some(VocabEntry::parse(&line).ok_or_else(|| Error::MalformedVocabulary {
            path: self.path.clone(),
            line: self.line_no,
            content: line,
        }))
    }
}

/// Read every DocumentMeta record; a malformed line is an error.
pub fn read_document_records(path: impl AsRef<Path>, with_norm: bool) -> Result<Vec<DocumentRecord>> {
    let path = path.as_ref();
    let file = File::open(path).at(path)?;
    let mut out = Vec::new();
    for (i, line) in BufReader::with_capacity(IO_BUFFER, file).lines().enumerate() {
        let line = line.at(path)?;
        if line.is_empty() {
            continue;
        }
        let record = DocumentRecord::parse(&line, with_norm).ok_or_else(|| Error::MalformedDocumentMeta {
            path: path.to_path_buf(),
            line: i + 1,
            content: line.clone(),
        })?;
        out.push(record);
    }
    Ok(out)
}

/// Random access into a postings file: seek to a term's offset and read
/// exactly `df` lines.
pub struct PostingReader {
    path: PathBuf,
    reader: BufReader<File>,
    line: String,
}

impl PostingReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).at(&path)?;
        Ok(Self { reader: BufReader::with_capacity(IO_BUFFER, file), path, line: String::with_capacity(128) })
    }

    /// Call `f` with each of the `df` lines starting at `offset` (without the
    /// trailing newline). Returns how many lines were read, fewer than `df`
    /// only when the file ends early.
    pub fn read_run(&mut self, offset: u64, df: u32, mut f: impl FnMut(&str)) -> Result<u32> {
        self.reader.seek(SeekFrom::Start(offset)).at(&self.path)?;
        let mut read = 0;
        while read < df {
            self.line.clear();
            if self.reader.read_line(&mut self.line).at(&self.path)? == 0 {
                tracing::warn!(path = %self.path.display(), offset, df, read, "postings ended before df records");
                break;
            }
            f(self.line.trim_end_matches(['\n', '\r']));
            read += 1;
        }
        Ok(read)
    }

    pub fn path(&self) -> &Path { &self.path }

    pub(crate) fn file_len(&self) -> Result<u64> {
        Ok(self.reader.get_ref().metadata().at(&self.path)?.len())
    }

    /// Copy the byte range `[start, start + len)` into `out` through `buf`.
    pub(crate) fn copy_range(&mut self, start: u64, len: u64, out: &mut CountingWriter, buf: &mut [u8]) -> Result<()> {
        self.reader.seek(SeekFrom::Start(start)).at(&self.path)?;
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.reader.read(&mut buf[..want]).at(&self.path)?;
            if n == 0 {
                return Err(Error::io(&self.path, std::io::ErrorKind::UnexpectedEof.into()));
            }
            out.write_bytes(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// First document ID of the run at `offset`, read from the leading digits.
    pub fn first_doc_id(&mut self, offset: u64) -> Result<Option<u64>> {
        self.reader.seek(SeekFrom::Start(offset)).at(&self.path)?;
        let mut buf = [0u8; 24];
        let n = self.reader.read(&mut buf).at(&self.path)?;
        let digits = buf[..n].iter().take_while(|b| b.is_ascii_digit()).count();
        Ok(std::str::from_utf8(&buf[..digits]).ok().and_then(|s| s.parse().ok()))
    }
}

pub fn save_manifest(paths: &IndexPaths, manifest: &IndexManifest) -> Result<()> {
    create_dir_all(&paths.root).at(&paths.root)?;
    let path = paths.manifest();
    let json = serde_json::to_string_pretty(manifest).map_err(|e| Error::Config(e.to_string()))?;
    let tmp = tmp_path(&path);
    std::fs::write(&tmp, json).at(&tmp)?;
    std::fs::rename(&tmp, &path).at(&path)?;
    Ok(())
}

pub fn load_manifest(paths: &IndexPaths) -> Result<IndexManifest> {
    let path = paths.manifest();
    if !path.exists() {
        return Err(Error::IncompleteIndex(paths.root.clone()));
    }
    let text = std::fs::read_to_string(&path).at(&path)?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::document::{DocumentBuilder, FieldType};
    use crate::source::RawDocument;
    use crate::tokenizer::{StopWords, Tokenizer};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn corpus(docs: &[(u64, &str)]) -> Corpus {
        let builder = DocumentBuilder::new(Arc::new(Tokenizer::new(StopWords::none(), TokenizerConfig::default())));
        let mut corpus = Corpus::new();
        for (id, body) in docs {
            corpus.add_document(builder.build(&RawDocument { id: *id, fields: vec![(FieldType::Body, body.to_string())] }, format!("{id}.json")));
        }
        corpus
    }

    #[test]
    fn batch_files_are_sorted_and_offsets_line_up() {
        let dir = tempdir().unwrap();
        let files = write_batch(&corpus(&[(2, "dog bird"), (1, "cat dog cat")]), 0, dir.path()).unwrap();

        let vocab = std::fs::read_to_string(&files.vocabulary).unwrap();
        let postings = std::fs::read_to_string(&files.postings).unwrap();
        assert_eq!(postings, "2 1 [2:1]\n1 2 [2:0,2:2]\n1 1 [2:1]\n2 1 [2:0]\n");
        assert_eq!(vocab, "bird 1 0\ncat 1 10\ndog 2 24\n");
        let meta = std::fs::read_to_string(&files.document_meta).unwrap();
        assert_eq!(meta, "2 2.json 1 2\n1 1.json 2 3\n");
        assert!(!tmp_path(&files.vocabulary).exists());
    }

    #[test]
    fn posting_reader_reads_exact_run() {
        let dir = tempdir().unwrap();
        let files = write_batch(&corpus(&[(1, "cat dog cat"), (2, "dog bird")]), 3, dir.path()).unwrap();
        let mut reader = PostingReader::open(&files.postings).unwrap();
        let mut seen = Vec::new();
        let n = reader.read_run(24, 2, |l| seen.push(Posting::parse_head(l).unwrap())).unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec![(1, 1), (2, 1)]);
        assert_eq!(reader.first_doc_id(24).unwrap(), Some(1));
    }

    #[test]
    fn failed_rename_leaves_no_partial_batch() {
        let dir = tempdir().unwrap();
        let files = BatchFiles::in_dir(dir.path(), 7);
        // Renaming a file over a non-empty directory fails after the other two moved.
        std::fs::create_dir(&files.vocabulary).unwrap();
        std::fs::write(files.vocabulary.join("keep"), "").unwrap();

        assert!(write_batch(&corpus(&[(1, "cat dog")]), 7, dir.path()).is_err());
        assert!(!files.document_meta.exists());
        assert!(!files.postings.exists());
        for p in [&files.vocabulary, &files.postings, &files.document_meta] {
            assert!(!tmp_path(p).exists(), "{} left behind", tmp_path(p).display());
        }
    }

    #[test]
    fn manifest_carries_build_stop_words() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let tokenizer = Tokenizer::new(StopWords::from_words(["Zebra", "the"]), TokenizerConfig::default());
        let manifest = IndexManifest {
            num_docs: 1,
            num_terms: 1,
            avg_doc_len: 1.0,
            idf: IdfMode::Smoothed,
            tokenizer: tokenizer.config().clone(),
            stop_words: Some(tokenizer.stop_words().sorted()),
            created_at: now_rfc3339(),
            version: MANIFEST_VERSION,
        };
        save_manifest(&paths, &manifest).unwrap();

        let loaded = load_manifest(&paths).unwrap();
        assert_eq!(loaded.stop_words, Some(vec!["the".to_string(), "zebra".to_string()]));
        assert_eq!(loaded.query_tokenizer().tokenize("the zebra and a cat"), vec!["and", "a", "cat"]);

        // older manifests have no list and use the English one
        let legacy = r#"{"num_docs":1,"num_terms":1,"avg_doc_len":1.0,"idf":"smoothed","created_at":"x","version":1}"#;
        std::fs::write(paths.manifest(), legacy).unwrap();
        let loaded = load_manifest(&paths).unwrap();
        assert!(loaded.stop_words.is_none());
        assert_eq!(loaded.query_tokenizer().tokenize("the zebra and a cat"), vec!["zebra", "cat"]);
    }

    #[test]
    fn missing_manifest_means_incomplete() {
        let dir = tempdir().unwrap();
        let err = load_manifest(&IndexPaths::new(dir.path())).unwrap_err();
        assert!(matches!(err, Error::IncompleteIndex(_)));
    }
}
