use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Bad or missing settings.  Detected at start-up and fatal to the run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("malformed connection string {0:?}")]
    MalformedConnection(String),

    #[error("unsupported database driver {0:?}, only duckdb is supported")]
    UnsupportedDriver(String),
}

#[derive(Error, Debug)]
pub enum FilesystemError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("download of {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

impl FetchError {
    /// The HTTP status code, if the server answered with a non-200 status.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error("{path} has no header row")]
    MissingHeader { path: PathBuf },

    #[error("failed to read the header of {path}: {source}")]
    Header { path: PathBuf, source: csv::Error },

    #[error("failed to read batch {batch} of {path}: {source}")]
    Read {
        batch: usize,
        path: PathBuf,
        source: csv::Error,
    },

    #[error("failed to recreate table {table}: {source}")]
    Recreate { table: String, source: duckdb::Error },

    #[error("failed to write batch {batch} into table {table}: {source}")]
    Write {
        batch: usize,
        table: String,
        source: duckdb::Error,
    },
}

impl LoadError {
    /// The 1-based index of the batch that failed, if the failure happened
    /// while reading or writing a batch.
    pub fn batch(&self) -> Option<usize> {
        match self {
            LoadError::Read { batch, .. } | LoadError::Write { batch, .. } => Some(*batch),
            _ => None,
        }
    }
}
