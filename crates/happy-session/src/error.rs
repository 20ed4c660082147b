//! Session supervisor error taxonomy (§7): only the variants a session
//! process can itself raise or must react to.

use thiserror::Error;

/// Errors surfaced by session startup or the mode loop.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend could not be reached at all; the supervisor should
    /// continue in offline mode rather than fail startup.
    #[error("offline: {0}")]
    Offline(String),

    /// The backend rejected the stored credentials; re-enrollment is
    /// required before the supervisor can continue.
    #[error("authentication failed, re-enrollment required")]
    AuthFailure,

    /// A strictly-increasing version write lost a race against a
    /// concurrent writer; the caller should retry against the adopted
    /// value rather than treat this as fatal.
    #[error("version conflict: local {local}, server {server}")]
    VersionMismatch {
        /// Version this process attempted to write.
        local: i64,
        /// Version the backend actually holds.
        server: i64,
    },

    /// The turn loop or agent driver was torn down deliberately (remote
    /// `switch`/`exit`, or a user-initiated abort); not a crash.
    #[error("aborted: {0}")]
    AbortError(String),

    /// The agent subprocess exited unexpectedly outside of an
    /// intentional abort/kill.
    #[error("agent process crashed: {0}")]
    AgentCrash(String),

    /// Startup could not complete at all (credentials missing, agent
    /// driver failed to connect, etc). Fatal: the process should exit 1.
    #[error("fatal startup error: {0}")]
    FatalStartupError(String),

    /// A lower-level sync/crypto/approval failure, wrapped for context.
    #[error(transparent)]
    Sync(#[from] happy_sync::error::SyncError),
}

/// Result type for `happy-session` operations.
pub type SessionResult<T> = Result<T, SessionError>;
