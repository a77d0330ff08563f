// src/error.rs

use std::{io, path::PathBuf};
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Every failure the core can report. All variants are recoverable by the
/// caller; none of them leaves a partially written store behind.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The spreadsheet could not be opened or parsed at all.
    #[error("cannot read source `{path}`: {reason}")]
    UnreadableSource { path: PathBuf, reason: String },

    /// The source file extension is not in the accepted set.
    #[error("unsupported file type `{extension}` for `{path}`")]
    UnsupportedFileType { path: PathBuf, extension: String },

    /// Required columns are absent from the source header row.
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A cell could not be coerced to its column type.
    #[error("invalid value `{value}` in {source_name} row {row}, column `{column}`")]
    InvalidCellValue {
        source_name: String,
        row: usize,
        column: String,
        value: String,
    },

    /// A table handed to the repository does not fit the store schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Filesystem failure while snapshotting or replacing the store.
    #[error("storage I/O error on `{path}`: {source}")]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The persisted table file exists but cannot be decoded.
    #[error("corrupt store `{path}`: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("snapshot `{0}` not found")]
    SnapshotNotFound(String),

    /// A projection or accepted-column list names a column outside the schema.
    #[error("unknown column `{0}`")]
    UnknownColumn(String),

    /// A soft-dedupe commit was attempted against a store that changed since
    /// the proposal was computed.
    #[error("duplicate proposal is stale: store changed since it was computed")]
    StaleProposal,

    #[error("duplicate group {0} is not part of the proposal")]
    UnknownGroup(usize),

    #[error("export to `{path}` failed: {reason}")]
    Export { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Wrap an `io::Error` together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// `true` for failures that happen before the store is touched at all.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            StoreError::UnreadableSource { .. }
                | StoreError::UnsupportedFileType { .. }
                | StoreError::MissingColumns(_)
                | StoreError::InvalidCellValue { .. }
                | StoreError::UnknownColumn(_)
        )
    }
}

/// Attach a path to any `io::Result`, in the spirit of `anyhow::Context`.
pub trait IoResultExt<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| StoreError::io(path, e))
    }
}
