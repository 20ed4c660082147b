//! Permission broker error type.

use thiserror::Error;

/// Errors raised by the permission broker.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The broker was reset while this call was in flight.
    #[error("permission broker was reset")]
    Reset,

    /// No pending request matched the given tool-call id (a late or
    /// duplicate response); this is not fatal, just dropped.
    #[error("no pending permission request for tool-call id {0}")]
    NoSuchPending(String),
}

/// Result type for `happy-approval` operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
