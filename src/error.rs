//! Error types for the log follower library.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for log follower operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from the underlying byte stream, passed through unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Seeking to a resume offset landed somewhere else.
    #[error("Cannot reposition within file: requested offset {requested}, landed at {actual}")]
    Reposition { requested: u64, actual: u64 },

    /// Querying the watched file's metadata failed. Terminal for the watch session.
    #[error("Failed to query metadata for {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A watcher instance only supports a single watch session.
    #[error("Watcher has already been started")]
    AlreadyStarted,

    /// The watcher backing a line stream terminated with an error.
    #[error("File watcher error: {0}")]
    Watcher(Arc<Error>),

    /// A background task failed to complete.
    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// A convenient Result type for log follower operations.
pub type Result<T> = std::result::Result<T, Error>;
