//! CLI-local error taxonomy (§7, §10.2). Startup failures stop here;
//! `main` maps them onto exit codes and hands everything else to `anyhow`.

use thiserror::Error;

/// Errors a CLI invocation can raise before a session/daemon is running.
#[derive(Debug, Error)]
pub enum CliError {
    /// `credentials.json` is missing or unreadable; re-enrollment (out of
    /// scope for this crate) must run first.
    #[error("no credentials found at {path}; re-enrollment is required")]
    CredentialsMissing {
        /// Path that was probed.
        path: String,
    },

    /// `credentials.json` exists but does not parse.
    #[error("credentials at {path} are corrupt: {reason}")]
    CredentialsCorrupt {
        /// Path that was probed.
        path: String,
        /// Underlying parse error.
        reason: String,
    },

    /// The Happy home directory could not be resolved or created.
    #[error("failed to resolve Happy home directory: {0}")]
    HomeUnavailable(String),

    /// A lower-level session-supervisor failure, wrapped for context.
    #[error(transparent)]
    Session(#[from] happy_session::SessionError),

    /// A lower-level daemon failure, wrapped for context.
    #[error(transparent)]
    Daemon(#[from] happy_daemon::DaemonError),

    /// A lower-level rollout-reader failure, wrapped for context.
    #[error(transparent)]
    Rollout(#[from] happy_rollout::RolloutError),
}

/// Result type for CLI command handlers.
pub type CliResult<T> = Result<T, CliError>;
