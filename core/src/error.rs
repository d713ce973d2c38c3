use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while building or querying an index.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed vocabulary line {line} in {path}: {content:?}")]
    MalformedVocabulary { path: PathBuf, line: usize, content: String },

    #[error("malformed document meta line {line} in {path}: {content:?}")]
    MalformedDocumentMeta { path: PathBuf, line: usize, content: String },

    #[error("invalid character {ch:?} in term {term:?} (only letters and digits allowed)")]
    InvalidTermChar { term: String, ch: char },

    #[error("cannot read document {path}: {reason}")]
    Document { path: PathBuf, reason: String },

    #[error("index at {0} is incomplete (no manifest)")]
    IncompleteIndex(PathBuf),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io { path: path.as_ref().to_path_buf(), source }
    }

    /// Errors the pipeline recovers from by skipping the offending document.
    pub fn is_document_local(&self) -> bool {
        matches!(self, Error::Document { .. })
    }
}

/// Attach a path to `std::io::Result` values.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
