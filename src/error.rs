//! Crate-wide error type.
//!
//! Only transient failures and rolled-back batches are errors. Lookups that
//! miss a track, playlist or favorite are reported through outcome enums in
//! [`crate::protocol`] instead.

use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the store, sync and artwork components.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The store connection or a statement failed; any open transaction was rolled back.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One record of a bulk ingest failed; nothing from the batch was committed.
    #[error("bulk upsert failed at {path}: {source}")]
    BulkUpsert {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An ingest was cancelled between records; nothing from the batch was committed.
    #[error("ingest cancelled after {processed} of {total} records")]
    Cancelled { processed: usize, total: usize },

    #[error("configuration error: {0}")]
    Config(String),

    /// Scanner input or command output could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LibraryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for failures that left the store untouched because a batch was rolled back.
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::BulkUpsert { .. } | Self::Cancelled { .. })
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;
