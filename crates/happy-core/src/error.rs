//! Core error types shared across the Happy local runtime.

use thiserror::Error;

/// Errors surfaced by `happy-core` itself (paths, atomic file writes, version parsing).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Neither the override env var nor `HOME` could be resolved.
    #[error("could not resolve home directory: {0}")]
    HomeUnresolvable(String),

    /// An I/O error while reading or atomically writing persisted state.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was acting on.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Persisted JSON state failed to parse (torn write, corruption).
    #[error("failed to parse state file {path}: {source}")]
    Corrupt {
        /// Path of the corrupt file.
        path: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for `happy-core` operations.
pub type CoreResult<T> = Result<T, CoreError>;
