//! Document source adapters: where raw field text comes from.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::document::FieldType;
use crate::error::{Error, IoContext, Result};
use crate::index::DocId;

/// Raw field text of one document, before tokenization.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub id: DocId,
    pub fields: Vec<(FieldType, String)>,
}

pub trait DocumentSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<RawDocument>;
}

/// Reads one JSON document per file.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDocumentSource;

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: DocId,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "abstract")]
    abstr: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    journal: String,
    #[serde(default)]
    publisher: String,
}

impl DocumentSource for JsonDocumentSource {
    fn load(&self, path: &Path) -> Result<RawDocument> {
        let bytes = std::fs::read(path).at(path)?;
        let doc: InputDoc = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Document { path: path.to_path_buf(), reason: e.to_string() })?;
        Ok(RawDocument {
            id: doc.id,
            fields: vec![
                (FieldType::Title, doc.title),
                (FieldType::Abstract, doc.abstr),
                (FieldType::Body, doc.body),
                (FieldType::Journal, doc.journal),
                (FieldType::Publisher, doc.publisher),
                (FieldType::Author, doc.authors.join(" ")),
                (FieldType::Category, doc.categories.join(" ")),
            ],
        })
    }
}

/// All `*.json` files under `root` (or `root` itself), sorted by path.
pub fn discover_documents(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(Error::io(root, std::io::Error::from(std::io::ErrorKind::NotFound)));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::io(path, e.into())
        })?;
        let p = entry.path();
        if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("json") {
            files.push(p.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_json_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.json");
        std::fs::write(&path, r#"{"id": 11, "title": "T", "authors": ["Ada Lovelace", "Alan Turing"]}"#).unwrap();
        let raw = JsonDocumentSource.load(&path).unwrap();
        assert_eq!(raw.id, 11);
        assert!(raw.fields.contains(&(FieldType::Author, "Ada Lovelace Alan Turing".to_string())));
    }

    #[test]
    fn malformed_json_is_document_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonDocumentSource.load(&path).unwrap_err().is_document_local());
    }

    #[test]
    fn invalid_utf8_is_document_error_and_missing_file_is_not() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin1.json");
        std::fs::write(&path, b"{\"id\": 1, \"title\": \"caf\xe9\"}").unwrap();
        assert!(JsonDocumentSource.load(&path).unwrap_err().is_document_local());

        let missing = JsonDocumentSource.load(&dir.path().join("gone.json")).unwrap_err();
        assert!(!missing.is_document_local());
        assert!(matches!(missing, Error::Io { .. }));
    }

    #[test]
    fn discovers_sorted_json_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["b.json", "a.json", "sub/c.json", "notes.txt"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let files = discover_documents(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf()).collect();
        assert_eq!(names, vec![PathBuf::from("a.json"), PathBuf::from("b.json"), PathBuf::from("sub/c.json")]);
    }
}
