//! Sync-layer error type.

use thiserror::Error;

/// Errors raised by the real-time transport and sync clients.
///
/// Per §7, the sync-client layer catches and logs all of these
/// internally during normal operation (reconnect loop, keep-alive) — a
/// caller only sees them surfaced from `flush()`'s hard timeout or from
/// explicit one-shot calls like `send_session_event`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The underlying WebSocket connection failed or was closed by the peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be parsed as the expected JSON envelope.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// `flush()` did not observe an ack within its 10 s hard timeout.
    #[error("flush timed out waiting for ack")]
    FlushTimeout,

    /// An optimistic-concurrency write was rejected as a version mismatch
    /// and the retry budget (driven by `happy_queue::backoff`) was
    /// exhausted or the caller chose not to retry further.
    #[error("version mismatch on optimistic write (server version {server_version})")]
    VersionMismatch {
        /// Version the server actually holds.
        server_version: i64,
    },
}

/// Result type for `happy-sync` operations.
pub type SyncResult<T> = Result<T, SyncError>;
