//! Application-wide error types.
//!
//! This module provides a unified error hierarchy for the application.
//! Library modules use specific error types via `thiserror`, while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level application error enum
//! - [`ScrapeError`](crate::classify::ScrapeError) for scraper failures
//! - [`Error::kind`] maps every variant into the fixed
//!   [`ErrorKind`](crate::classify::ErrorKind) taxonomy
//!
//! # Example
//!
//! ```ignore
//! use av_organizer::error::{Error, Result};
//!
//! fn place(path: &Path) -> Result<()> {
//!     std::fs::create_dir_all(path).map_err(|e| Error::fs("create directory", path, e))?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use crate::classify::{ErrorKind, ScrapeError};

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem operation on a specific path
    #[error("Failed to {op} {path}: {source}")]
    FileSystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bad configuration, detected before any task runs
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Scraper failure that escaped the resolver
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Copy finished but the destination does not match the source
    #[error("Verification failed for {path}: expected {expected} bytes, found {actual}")]
    Verification {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// The pipeline stopped because of a condition affecting every task
    #[error("Pipeline aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Create a filesystem error for an operation on a path.
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classify this error into the fixed taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::FileSystem { .. }
            | Error::Verification { .. }
            | Error::Aborted(_) => ErrorKind::FileSystem,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Scrape(e) => e.kind(),
            Error::Json(_) => ErrorKind::Parse,
        }
    }

    /// The underlying I/O error, if this is a filesystem failure.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            Error::Io(e) | Error::FileSystem { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
