//! Rollout-scanning error type.

use thiserror::Error;

/// Errors raised while tailing or scanning rollout files.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// The rollout root directory could not be read.
    #[error("failed to read rollout root {path}: {source}")]
    RootUnreadable {
        /// The directory that could not be enumerated.
        path: std::path::PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A filesystem watcher could not be installed.
    #[error("failed to install rollout watcher: {0}")]
    Watch(String),
}

/// Result type for `happy-rollout` operations.
pub type RolloutResult<T> = Result<T, RolloutError>;
