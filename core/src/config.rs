use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, IoContext, Result};

/// Inverse document frequency used for vector norms and VSM weights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdfMode {
    /// ln(N / df)
    Plain,
    /// ln(1 + N / df)
    #[default]
    Smoothed,
}

impl IdfMode {
    pub fn idf(self, num_docs: u64, df: u32) -> f64 {
        let n = num_docs as f64;
        let df = df.max(1) as f64;
        match self {
            IdfMode::Plain => (n / df).ln(),
            IdfMode::Smoothed => (1.0 + n / df).ln(),
        }
    }
}

/// Tokenizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Apply NFKC normalization before splitting.
    pub normalize_unicode: bool,
    /// Reduce terms with the English Snowball stemmer.
    pub stem: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self { normalize_unicode: true, stem: false }
    }
}

/// Settings for `indexer build`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Documents per batch.
    pub batch_size: usize,
    /// Batches allowed in memory at once (parsed but not yet flushed).
    pub max_resident_batches: usize,
    /// Worker threads for document parsing.
    pub parse_threads: usize,
    /// Seconds to wait for the writer to drain on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Keep per-batch files after merging.
    pub keep_batches: bool,
    pub idf: IdfMode,
    pub tokenizer: TokenizerConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            max_resident_batches: 2,
            parse_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            shutdown_timeout_secs: 60,
            keep_batches: false,
            idf: IdfMode::default(),
            tokenizer: TokenizerConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).at(path)?;
        let cfg: IndexerConfig =
            serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.max_resident_batches == 0 {
            return Err(Error::Config("max_resident_batches must be at least 1".into()));
        }
        if self.parse_threads == 0 {
            return Err(Error::Config("parse_threads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_idf_is_zero_for_ubiquitous_terms() {
        assert_eq!(IdfMode::Plain.idf(10, 10), 0.0);
        assert!(IdfMode::Smoothed.idf(10, 10) > 0.0);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: IndexerConfig = serde_json::from_str(r#"{"batch_size": 8, "idf": "plain"}"#).unwrap();
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.max_resident_batches, 2);
        assert_eq!(cfg.idf, IdfMode::Plain);
        assert!(cfg.tokenizer.normalize_unicode);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = IndexerConfig { batch_size: 0, ..IndexerConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
