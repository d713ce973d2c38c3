//! Batch pipeline: parse documents in fixed-size batches, flush each batch to
//! its own sorted files, then merge and finalize the index.
//!
//! A batch holds a semaphore permit from before parsing starts until its files
//! are flushed and its corpus dropped, so at most `max_resident_batches`
//! parsed corpora exist at any time. Parsed batches move to a single writer
//! task through a bounded channel together with their permit.

use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::IndexerConfig;
use crate::corpus::Corpus;
use crate::document::DocumentBuilder;
use crate::error::{Error, Result};
use crate::merge::{merge_index, remove_batches, MergeSummary};
use crate::norms::{NormCalculator, NormSummary};
use crate::persist::{now_rfc3339, save_manifest, write_batch, BatchFiles, IndexManifest, IndexPaths, MANIFEST_VERSION};
use crate::source::{discover_documents, DocumentSource};
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Flushed batches, sorted by batch number.
    pub batches: Vec<BatchFiles>,
    pub batches_written: usize,
    pub documents: u64,
    pub failed_documents: u64,
    pub empty_batches: usize,
    /// Most batches alive at once, counted from the start of parsing until
    /// the corpus is dropped after its flush.
    pub peak_resident: usize,
}

/// Live batch count and its high-water mark.
#[derive(Debug, Default)]
struct ResidentGauge {
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl ResidentGauge {
    fn enter(gauge: &Arc<Self>) -> Resident {
        let live = gauge.live.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(live, Ordering::SeqCst);
        Resident(Arc::clone(gauge))
    }

    fn peak(&self) -> usize { self.peak.load(Ordering::SeqCst) }
}

/// One batch counted as resident until dropped.
struct Resident(Arc<ResidentGauge>);

impl Drop for Resident {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A parsed batch on its way to the writer. Fields drop in order, so the
/// corpus is gone before the permit is released.
struct ParsedBatch {
    batch_no: usize,
    corpus: Corpus,
    resident: Resident,
    permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct ParseCounters {
    failed: u64,
    empty: usize,
}

struct WriterOutcome {
    batches: Vec<BatchFiles>,
    documents: u64,
    failure: Option<Error>,
}

pub struct BatchPipeline {
    config: IndexerConfig,
    builder: Arc<DocumentBuilder>,
    source: Arc<dyn DocumentSource>,
    pool: Arc<rayon::ThreadPool>,
}

impl BatchPipeline {
    pub fn new(config: IndexerConfig, tokenizer: Arc<Tokenizer>, source: Arc<dyn DocumentSource>) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parse_threads)
            .thread_name(|i| format!("parse-{i}"))
            .build()
            .map_err(|e| Error::Pipeline(format!("cannot start parse pool: {e}")))?;
        Ok(Self { config, builder: Arc::new(DocumentBuilder::new(tokenizer)), source, pool: Arc::new(pool) })
    }

    /// Parse and flush every document in `files`, writing batch files under
    /// `batch_dir`.
    pub async fn run(&self, files: Vec<PathBuf>, batch_dir: &Path) -> Result<PipelineReport> {
        let start = Instant::now();
        let capacity = self.config.max_resident_batches;
        let semaphore = Arc::new(Semaphore::new(capacity));
        let (tx, rx) = mpsc::channel::<ParsedBatch>(capacity);
        let counters = Arc::new(Mutex::new(ParseCounters::default()));
        let gauge = Arc::new(ResidentGauge::default());

        let writer = tokio::spawn(write_batches(rx, batch_dir.to_path_buf()));

        let mut parse_tasks: Vec<JoinHandle<Result<()>>> = Vec::new();
        let mut producer_error = None;
        for (batch_no, chunk) in files.chunks(self.config.batch_size).enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    producer_error = Some(Error::Pipeline("batch semaphore closed".into()));
                    break;
                }
            };
            let resident = ResidentGauge::enter(&gauge);
            tracing::debug!(batch_no, documents = chunk.len(), "batch admitted");

            let paths = chunk.to_vec();
            let tx = tx.clone();
            let builder = Arc::clone(&self.builder);
            let source = Arc::clone(&self.source);
            let pool = Arc::clone(&self.pool);
            let counters = Arc::clone(&counters);
            parse_tasks.push(tokio::spawn(async move {
                let parsed = tokio::task::spawn_blocking(move || {
                    pool.install(|| parse_batch(&builder, source.as_ref(), &paths))
                })
                .await
                .unwrap_or_else(|e| Err(Error::Pipeline(format!("parse task for batch {batch_no} failed: {e}"))));
                let (corpus, failed) = match parsed {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        drop(resident);
                        drop(permit);
                        return Err(e);
                    }
                };

                let empty = {
                    let mut c = counters.lock();
                    c.failed += failed;
                    c.empty += usize::from(corpus.is_empty());
                    corpus.is_empty()
                };
                if empty {
                    tracing::debug!(batch_no, "empty batch, nothing to write");
                    drop(corpus);
                    drop(resident);
                    drop(permit);
                    return Ok(());
                }
                tx.send(ParsedBatch { batch_no, corpus, resident, permit })
                    .await
                    .map_err(|_| Error::Pipeline(format!("writer closed before batch {batch_no}")))
            }));
        }
        drop(tx);

        let mut first_error = producer_error;
        for task in parse_tasks {
            let result = task.await.unwrap_or_else(|e| Err(Error::Pipeline(format!("parse task panicked: {e}"))));
            if let Err(e) = result {
                tracing::error!(error = %e, "batch parse failed");
                first_error.get_or_insert(e);
            }
        }

        let timeout = self.config.shutdown_timeout();
        let mut writer = writer;
        let outcome = match tokio::time::timeout(timeout, &mut writer).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(Error::Pipeline(format!("writer task failed: {e}"))),
            Err(_) => {
                writer.abort();
                return Err(Error::Pipeline(format!("writer did not drain within {}s", timeout.as_secs())));
            }
        };
        if let Some(e) = outcome.failure.or(first_error) {
            return Err(e);
        }

        let (failed_documents, empty_batches) = {
            let c = counters.lock();
            (c.failed, c.empty)
        };
        let mut batches = outcome.batches;
        batches.sort_by_key(|b| b.batch_no);
        let report = PipelineReport {
            batches_written: batches.len(),
            batches,
            documents: outcome.documents,
            failed_documents,
            empty_batches,
            peak_resident: gauge.peak(),
        };
        tracing::info!(
            batches = report.batches_written,
            documents = report.documents,
            failed = report.failed_documents,
            empty_batches = report.empty_batches,
            peak_resident = report.peak_resident,
            elapsed_s = start.elapsed().as_secs_f64(),
            "batch pipeline finished"
        );
        Ok(report)
    }
}

/// Load and tokenize `paths` in parallel, then assemble them in input order.
/// Returns the corpus and the number of documents that were skipped. Only
/// document-local failures are skipped; anything else fails the batch.
fn parse_batch(builder: &DocumentBuilder, source: &dyn DocumentSource, paths: &[PathBuf]) -> Result<(Corpus, u64)> {
    let parsed: Vec<_> = paths
        .par_iter()
        .map(|path| source.load(path).map(|raw| builder.build(&raw, path.display().to_string())))
        .collect();

    let mut corpus = Corpus::new();
    let mut failed = 0u64;
    for (path, doc) in paths.iter().zip(parsed) {
        match doc {
            Ok(doc) => {
                if !corpus.add_document(doc) {
                    failed += 1;
                }
            }
            Err(e) if e.is_document_local() => {
                tracing::warn!(path = %path.display(), error = %e, "skipping document");
                failed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((corpus, failed))
}

/// Single consumer of parsed batches. After the first failure the remaining
/// batches are drained and dropped so producers never block on a dead writer.
async fn write_batches(mut rx: mpsc::Receiver<ParsedBatch>, dir: PathBuf) -> WriterOutcome {
    let mut outcome = WriterOutcome { batches: Vec::new(), documents: 0, failure: None };
    while let Some(batch) = rx.recv().await {
        if outcome.failure.is_some() {
            continue;
        }
        let ParsedBatch { batch_no, corpus, resident, permit } = batch;
        let dir = dir.clone();
        let written = tokio::task::spawn_blocking(move || {
            let result = write_batch(&corpus, batch_no, &dir).map(|files| (files, corpus.len() as u64));
            drop(corpus);
            drop(resident);
            drop(permit);
            result
        })
        .await;
        match written {
            Ok(Ok((files, docs))) => {
                tracing::info!(batch_no, documents = docs, "batch flushed");
                outcome.documents += docs;
                outcome.batches.push(files);
            }
            Ok(Err(e)) => {
                tracing::error!(batch_no, error = %e, "batch write failed");
                outcome.failure = Some(e);
            }
            Err(e) => outcome.failure = Some(Error::Pipeline(format!("writer for batch {batch_no} panicked: {e}"))),
        }
    }
    outcome
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub pipeline: PipelineReport,
    pub merge: MergeSummary,
    pub norms: NormSummary,
    pub manifest: IndexManifest,
}

/// Build a finalized index at `output` from the documents under `input`:
/// batch pipeline, merge, norms, then the manifest.
pub async fn build_index(
    input: &Path,
    output: &Path,
    tokenizer: Arc<Tokenizer>,
    source: Arc<dyn DocumentSource>,
    config: &IndexerConfig,
) -> Result<BuildReport> {
    let paths = IndexPaths::new(output);
    // A previous manifest would mark a half-rebuilt index as complete.
    let manifest_path = paths.manifest();
    if manifest_path.exists() {
        std::fs::remove_file(&manifest_path).map_err(|e| Error::io(&manifest_path, e))?;
    }

    let tokenizer_config = tokenizer.config().clone();
    let stop_words = tokenizer.stop_words().sorted();
    let files = discover_documents(input)?;
    tracing::info!(input = %input.display(), documents = files.len(), "discovered documents");

    let pipeline = BatchPipeline::new(config.clone(), tokenizer, source)?;
    let batch_dir = paths.batch_dir();
    let report = pipeline.run(files, &batch_dir).await?;

    let batches = report.batches.clone();
    let out = output.to_path_buf();
    let keep = config.keep_batches;
    let merge = tokio::task::spawn_blocking(move || {
        let summary = merge_index(&batches, &out)?;
        if !keep {
            remove_batches(&batches, &IndexPaths::new(&out).batch_dir());
        }
        Ok::<_, Error>(summary)
    })
    .await
    .map_err(|e| Error::Pipeline(format!("merge task failed: {e}")))??;

    let calculator = NormCalculator::new(output, config.idf);
    let norms = tokio::task::spawn_blocking(move || calculator.run())
        .await
        .map_err(|e| Error::Pipeline(format!("norm task failed: {e}")))??;

    let manifest = IndexManifest {
        num_docs: norms.documents,
        num_terms: merge.terms,
        avg_doc_len: norms.avg_doc_len,
        idf: config.idf,
        tokenizer: tokenizer_config,
        stop_words: Some(stop_words),
        created_at: now_rfc3339(),
        version: MANIFEST_VERSION,
    };
    save_manifest(&paths, &manifest)?;
    tracing::info!(output = %output.display(), docs = manifest.num_docs, terms = manifest.num_terms, "index finalized");
    Ok(BuildReport { pipeline: report, merge, norms, manifest })
}
