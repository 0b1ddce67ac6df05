//! Turns the raw downloads into the processed files the indexer reads.
//!
//! Every step tolerates missing inputs: a missing source file is logged and
//! skipped, so a partial `data/raw` still produces a usable index.

pub mod csv;
pub mod flavor;
pub mod sections;
pub mod tables;

use std::fs;
use std::path::{ Path, PathBuf };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed CSV '{path}' at line {line}: {message}")]
    Csv {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

pub(crate) fn read_text(path: &Path) -> Result<String, IngestError> {
    fs::read_to_string(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })
}

pub(crate) fn read_json(path: &Path) -> Result<serde_json::Value, IngestError> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|source| IngestError::Json { path: path.to_path_buf(), source })
}

pub(crate) fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), IngestError> {
    let text = serde_json
        ::to_string_pretty(value)
        .map_err(|source| IngestError::Json { path: path.to_path_buf(), source })?;
    fs::write(path, text).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })
}

pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), IngestError> {
    fs::write(path, text).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })
}

pub(crate) fn ensure_dir(path: &Path) -> Result<(), IngestError> {
    fs::create_dir_all(path).map_err(|source| IngestError::Io { path: path.to_path_buf(), source })
}
