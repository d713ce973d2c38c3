use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use searchcore::pipeline::build_index;
use searchcore::retrieval::{rank, read_queries, Query, QueryEngine, QueryExpander, RetrievalModel, RunWriter, DEFAULT_TOP_K};
use searchcore::source::JsonDocumentSource;
use searchcore::tokenizer::{StopWords, Tokenizer};
use searchcore::{IdfMode, IndexerConfig};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build a batch inverted index and run ranked queries against it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum IdfArg {
    Smoothed,
    Plain,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Vsm,
    Bm25,
}

impl From<ModelArg> for RetrievalModel {
    fn from(m: ModelArg) -> Self {
        match m {
            ModelArg::Vsm => RetrievalModel::VectorSpace,
            ModelArg::Bm25 => RetrievalModel::OkapiBm25,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from a directory of JSON documents
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Output index directory
        #[arg(long)]
        output: PathBuf,
        /// Directory of *.txt stop-word lists (built-in English list otherwise)
        #[arg(long)]
        stopwords: Option<PathBuf>,
        /// JSON file with indexer settings; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        max_resident_batches: Option<usize>,
        #[arg(long)]
        parse_threads: Option<usize>,
        #[arg(long, value_enum)]
        idf: Option<IdfArg>,
        /// Apply the English Snowball stemmer
        #[arg(long, default_value_t = false)]
        stem: bool,
        /// Keep per-batch files after merging
        #[arg(long, default_value_t = false)]
        keep_batches: bool,
    },
    /// Evaluate queries and write a ranked run file
    Search {
        #[arg(long)]
        index: PathBuf,
        /// Stop-word directory overriding the list recorded at build time
        #[arg(long)]
        stopwords: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ModelArg::Vsm)]
        model: ModelArg,
        /// Query text; may be repeated
        #[arg(long, conflicts_with = "queries")]
        query: Vec<String>,
        /// File with one query per line
        #[arg(long)]
        queries: Option<PathBuf>,
        /// Expand each query with terms from its top results and search again
        #[arg(long, default_value_t = false)]
        expand: bool,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Run file path (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, stopwords, config, batch_size, max_resident_batches, parse_threads, idf, stem, keep_batches } => {
            let mut cfg = match config {
                Some(path) => IndexerConfig::from_json_file(&path)?,
                None => IndexerConfig::default(),
            };
            if let Some(n) = batch_size { cfg.batch_size = n; }
            if let Some(n) = max_resident_batches { cfg.max_resident_batches = n; }
            if let Some(n) = parse_threads { cfg.parse_threads = n; }
            if let Some(idf) = idf {
                cfg.idf = match idf {
                    IdfArg::Smoothed => IdfMode::Smoothed,
                    IdfArg::Plain => IdfMode::Plain,
                };
            }
            cfg.tokenizer.stem |= stem;
            cfg.keep_batches |= keep_batches;
            cfg.validate()?;
            build(&input, &output, stopwords.as_deref(), cfg)
        }
        Commands::Search { index, stopwords, model, query, queries, expand, top_k, output } => {
            search(&index, stopwords.as_deref(), model.into(), query, queries.as_deref(), expand, top_k, output.as_deref())
        }
    }
}

fn load_stop_words(dir: Option<&Path>) -> Result<StopWords> {
    Ok(match dir {
        Some(dir) => StopWords::load_dir(dir)?,
        None => StopWords::english(),
    })
}

#[derive(Serialize)]
struct BuildSummary {
    documents: u64,
    failed_documents: u64,
    batches: usize,
    peak_resident_batches: usize,
    terms: u64,
    avg_doc_len: f64,
    elapsed_s: f64,
}

fn build(input: &Path, output: &Path, stopwords: Option<&Path>, cfg: IndexerConfig) -> Result<()> {
    let start = Instant::now();
    let tokenizer = Arc::new(Tokenizer::new(load_stop_words(stopwords)?, cfg.tokenizer.clone()));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;
    let report = runtime
        .block_on(build_index(input, output, tokenizer, Arc::new(JsonDocumentSource), &cfg))
        .with_context(|| format!("building index at {}", output.display()))?;

    let summary = BuildSummary {
        documents: report.pipeline.documents,
        failed_documents: report.pipeline.failed_documents,
        batches: report.pipeline.batches_written,
        peak_resident_batches: report.pipeline.peak_resident,
        terms: report.manifest.num_terms,
        avg_doc_len: report.manifest.avg_doc_len,
        elapsed_s: start.elapsed().as_secs_f64(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    tracing::info!(output = %output.display(), "index build complete");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn search(
    index: &Path,
    stopwords: Option<&Path>,
    model: RetrievalModel,
    texts: Vec<String>,
    queries_file: Option<&Path>,
    expand: bool,
    top_k: usize,
    output: Option<&Path>,
) -> Result<()> {
    let engine = QueryEngine::open(index).with_context(|| format!("opening index {}", index.display()))?;
    // Without an explicit list, tokenize queries exactly like the build did.
    let tokenizer = Arc::new(match stopwords {
        Some(dir) => Tokenizer::new(StopWords::load_dir(dir)?, engine.manifest().tokenizer.clone()),
        None => engine.manifest().query_tokenizer(),
    });

    let queries: Vec<Query> = match queries_file {
        Some(path) => read_queries(path, &tokenizer)?,
        None => texts.iter().enumerate().map(|(i, t)| Query::new((i + 1).to_string(), t, &tokenizer)).collect(),
    };
    if queries.is_empty() {
        bail!("no queries given (use --query or --queries)");
    }

    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| format!("creating {}", path.display()))?)),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut run = RunWriter::new(sink, output.unwrap_or(Path::new("<stdout>")))?;
    let expander = expand.then(|| QueryExpander::new(Arc::clone(&tokenizer), Arc::new(JsonDocumentSource)));

    let start = Instant::now();
    for query in &queries {
        let t = Instant::now();
        let mut hits = model.evaluate_top(query, &engine, top_k)?;
        if let Some(expander) = &expander {
            let expanded = expander.expand(query, &hits, &engine);
            hits = model.evaluate_top(&expanded, &engine, top_k)?;
        }
        run.write_query(query.id(), &rank(&hits), model)?;
        tracing::info!(query_id = query.id(), hits = hits.len(), elapsed_s = t.elapsed().as_secs_f64(), "query done");
    }
    run.finish()?;
    tracing::info!(queries = queries.len(), model = %model, elapsed_s = start.elapsed().as_secs_f64(), "search complete");
    Ok(())
}
