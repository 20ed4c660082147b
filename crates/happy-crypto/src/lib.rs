//! Symmetric envelope encryption and content-key wrapping for the Happy
//! local runtime (§4.1).
//!
//! ```
//! use happy_crypto::{decrypt, encrypt};
//!
//! let key = [7u8; 32];
//! let envelope = encrypt(&key, &serde_json::json!({"path": "/tmp"})).unwrap();
//! let value: Option<serde_json::Value> = decrypt(&key, &envelope).unwrap();
//! assert!(value.is_some());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod b64;
mod content_key;
mod envelope;
mod error;

pub use b64::{decode_b64, decode_b64_url, encode_b64, encode_b64_url};
pub use content_key::{WRAP_VERSION, generate_content_key, unwrap_content_key, wrap_content_key};
pub use envelope::{KEY_LEN, NONCE_LEN, decrypt, encrypt};
pub use error::{CryptoError, CryptoResult};
