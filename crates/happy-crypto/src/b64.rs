//! Base64 framing for encrypted envelopes on the wire (§4.1 `encodeB64`/`decodeB64`).

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};

use crate::error::CryptoResult;

/// Standard-alphabet base64 encode.
#[must_use]
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Standard-alphabet base64 decode.
///
/// # Errors
///
/// Returns [`crate::CryptoError::InvalidBase64`] on malformed input.
pub fn decode_b64(encoded: &str) -> CryptoResult<Vec<u8>> {
    Ok(STANDARD.decode(encoded)?)
}

/// URL-safe base64 encode.
#[must_use]
pub fn encode_b64_url(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// URL-safe base64 decode.
///
/// # Errors
///
/// Returns [`crate::CryptoError::InvalidBase64`] on malformed input.
pub fn decode_b64_url(encoded: &str) -> CryptoResult<Vec<u8>> {
    Ok(URL_SAFE.decode(encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_round_trip() {
        let data = b"hello, happy";
        let encoded = encode_b64(data);
        assert_eq!(decode_b64(&encoded).unwrap(), data);
    }

    #[test]
    fn url_safe_round_trip_with_padding_chars() {
        // Bytes chosen so standard base64 would emit '+' or '/'.
        let data = [0xFB, 0xFF, 0xFE, 0x3E, 0x3F];
        let encoded = encode_b64_url(&data);
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode_b64_url(&encoded).unwrap(), data);
    }

    #[test]
    fn decode_rejects_invalid_input() {
        assert!(decode_b64("not valid base64!!").is_err());
    }
}
