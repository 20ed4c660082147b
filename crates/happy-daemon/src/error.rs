//! Daemon error taxonomy (§7): the subset of the shared taxonomy a daemon
//! process can itself raise.

use thiserror::Error;

/// Errors surfaced by daemon startup, the heartbeat loop, or child
/// tracking.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Another daemon already holds the lock file and is alive with a
    /// matching CLI version; this invocation should exit 0 without
    /// touching the state file.
    #[error("a daemon is already running (pid {0})")]
    AlreadyRunning(u32),

    /// The lock file exists and its owner is alive, but acquiring it
    /// raced and lost — distinct from `AlreadyRunning` only in that the
    /// caller observed a live competitor mid-acquisition rather than at
    /// the startup version check.
    #[error("failed to acquire daemon lock: {0}")]
    LockFailed(String),

    /// The loopback control server could not bind to any port.
    #[error("failed to bind loopback control server: {0}")]
    BindFailed(String),

    /// Startup could not complete at all (credentials missing, state
    /// directory unwritable, etc). Fatal: the process should exit 1.
    #[error("fatal startup error: {0}")]
    FatalStartupError(String),

    /// A lower-level I/O failure while reading or writing daemon state.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A lower-level core error (paths, atomic writes).
    #[error(transparent)]
    Core(#[from] happy_core::CoreError),
}

/// Result type for `happy-daemon` operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
