//! Content-key wrapping for the `dataKey` encryption variant (§4.1,
//! §3 `EncryptionDescriptor::DataKey`): anonymous public-key encryption
//! of a per-entity content key under the backend's public key, so the
//! backend can hand out a fresh content key without ever itself holding
//! the machine key.

use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SealedBox};
use rand::RngCore as _;

use crate::error::{CryptoError, CryptoResult};

/// Version byte prefixed to every wrapped content key. Bumped if the
/// wrapping scheme ever changes; `0` is the only version this build
/// produces or accepts.
pub const WRAP_VERSION: u8 = 0;

/// Anonymously encrypt `content_key` under `backend_public_key`, prefixed
/// with a one-byte version tag.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `backend_public_key` is
/// not 32 bytes.
pub fn wrap_content_key(content_key: &[u8], backend_public_key: &[u8]) -> CryptoResult<Vec<u8>> {
    if backend_public_key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: backend_public_key.len(),
        });
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(backend_public_key);
    let public_key = PublicKey::from(key_bytes);

    let sealed = SealedBox::new(&public_key)
        .seal(&mut OsRng, content_key)
        .map_err(|_| CryptoError::UnwrapAuthFailure)?;

    let mut out = Vec::with_capacity(1 + sealed.len());
    out.push(WRAP_VERSION);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Unwrap a content key sealed by [`wrap_content_key`], using the
/// backend keypair's secret half. Used on the rare local paths (tests,
/// migration tooling) that need to verify a wrap round-trips; production
/// unwrap happens server-side.
///
/// # Errors
///
/// Returns [`CryptoError::TruncatedWrappedKey`] if `wrapped` has no
/// version byte, [`CryptoError::UnsupportedWrapVersion`] if the version
/// byte is not `0`, and [`CryptoError::UnwrapAuthFailure`] if the sealed
/// box fails to open.
pub fn unwrap_content_key(
    wrapped: &[u8],
    backend_secret_key: &crypto_box::SecretKey,
) -> CryptoResult<Vec<u8>> {
    let (version, sealed) = wrapped
        .split_first()
        .ok_or(CryptoError::TruncatedWrappedKey)?;
    if *version != WRAP_VERSION {
        return Err(CryptoError::UnsupportedWrapVersion(*version));
    }
    SealedBox::new(&backend_secret_key.public_key())
        .unseal(sealed, backend_secret_key)
        .map_err(|_| CryptoError::UnwrapAuthFailure)
}

/// Generate a fresh random 32-byte content key. Used by the session/
/// machine creation path when minting a new `dataKey`-variant entity.
#[must_use]
pub fn generate_content_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_box::SecretKey;

    #[test]
    fn wrap_and_unwrap_round_trips() {
        let secret = SecretKey::generate(&mut OsRng);
        let public_bytes = secret.public_key().as_bytes().to_vec();
        let content_key = generate_content_key();

        let wrapped = wrap_content_key(&content_key, &public_bytes).unwrap();
        assert_eq!(wrapped[0], WRAP_VERSION);

        let unwrapped = unwrap_content_key(&wrapped, &secret).unwrap();
        assert_eq!(unwrapped, content_key);
    }

    #[test]
    fn unwrap_rejects_bad_version_byte() {
        let secret = SecretKey::generate(&mut OsRng);
        let public_bytes = secret.public_key().as_bytes().to_vec();
        let mut wrapped = wrap_content_key(&generate_content_key(), &public_bytes).unwrap();
        wrapped[0] = 99;
        let result = unwrap_content_key(&wrapped, &secret);
        assert!(matches!(
            result,
            Err(CryptoError::UnsupportedWrapVersion(99))
        ));
    }

    #[test]
    fn unwrap_rejects_empty_input() {
        let secret = SecretKey::generate(&mut OsRng);
        let result = unwrap_content_key(&[], &secret);
        assert!(matches!(result, Err(CryptoError::TruncatedWrappedKey)));
    }

    #[test]
    fn wrap_rejects_short_public_key() {
        let result = wrap_content_key(&generate_content_key(), &[0u8; 10]);
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength { .. })));
    }

    #[test]
    fn generated_content_keys_are_32_bytes_and_distinct() {
        let k1 = generate_content_key();
        let k2 = generate_content_key();
        assert_eq!(k1.len(), 32);
        assert_ne!(k1, k2);
    }
}
