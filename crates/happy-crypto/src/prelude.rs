//! Commonly used types for convenient import: `use happy_crypto::prelude::*;`.

pub use crate::{CryptoError, CryptoResult};
pub use crate::{decode_b64, decode_b64_url, encode_b64, encode_b64_url};
pub use crate::{decrypt, encrypt};
pub use crate::{generate_content_key, unwrap_content_key, wrap_content_key};
