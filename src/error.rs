//! Error taxonomy for the embedding pipeline.
//!
//! Per-item failures (decode, embed, store, move) are caught at the item
//! boundary, logged with the offending media id, and excluded from the
//! success count. `DimensionMismatch` is the exception: similarity cannot
//! be computed against mixed dimensions, so it aborts the whole run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unreadable or corrupt media content.
    #[error("failed to decode media {id}: {reason}")]
    Decode { id: i64, reason: String },

    /// The embedder was used before `init()`.
    #[error("embedding model not initialized")]
    NotInitialized,

    /// Model inference failed.
    #[error("inference failed: {0}")]
    Embed(String),

    /// Persistence failure in the embedding store or flat file.
    #[error("embedding store error: {0}")]
    Store(String),

    /// A stored vector's length disagrees with the encoder dimension.
    /// Fatal to the run.
    #[error("stored vector has dimension {actual}, encoder expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Destination unwritable, source vanished, or rename/copy failed.
    #[error("failed to move {}: {reason}", path.display())]
    Move { path: PathBuf, reason: String },

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error must abort the run instead of being counted
    /// against a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DimensionMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
