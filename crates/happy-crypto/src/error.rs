//! Crypto layer error type.

use thiserror::Error;

/// Errors raised by `happy-crypto`. Note that authentication/decryption
/// failures are intentionally *not* errors — [`crate::decrypt`] returns
/// `None` for those (§4.1) so callers never need to distinguish "bad
/// ciphertext" from "wrong key" from a thrown exception.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// `value` could not be serialized to canonical JSON before encryption.
    #[error("failed to serialize value for encryption: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A key was the wrong length for the primitive it was used with.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// Base64 input could not be decoded.
    #[error("invalid base64 encoding")]
    InvalidBase64(#[from] base64::DecodeError),

    /// Wrapped content-key bytes were too short to contain a version
    /// prefix and a sealed box.
    #[error("wrapped content key is truncated")]
    TruncatedWrappedKey,

    /// Wrapped content-key bytes carried a version byte this build does
    /// not understand.
    #[error("unsupported wrapped-content-key version: {0}")]
    UnsupportedWrapVersion(u8),

    /// Sealed-box unwrap failed authentication.
    #[error("failed to unwrap content key: authentication failed")]
    UnwrapAuthFailure,
}

/// Result type for `happy-crypto` operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
