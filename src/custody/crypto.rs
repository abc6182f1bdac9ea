//! Cryptographic primitives for master-key custody.
//!
//! # Algorithms
//!
//! - **Key Derivation**: PBKDF2-HMAC-SHA256 with a deliberately high
//!   iteration count, so a stolen slot store resists offline brute-force
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//!
//! Any tag mismatch on decrypt is a hard failure. There is no code path
//! that returns partially-decrypted or silently-wrong plaintext.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::types::{CellarError, Result};

/// PBKDF2 iteration count for password-derived keys.
pub const PBKDF2_ITERATIONS: u32 = 600_000;

/// Salt length for key derivation (16 bytes).
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes).
pub const NONCE_LEN: usize = 12;

/// Poly1305 authentication tag length (16 bytes).
pub const AUTH_TAG_LEN: usize = 16;

/// Master key length (32 bytes).
pub const MASTER_KEY_LEN: usize = 32;

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Derive a 256-bit encryption key from a password.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    derive_key_with_rounds(password, salt, PBKDF2_ITERATIONS)
}

/// Derivation with an explicit round count. Tests use a small count so the
/// suite stays fast; production paths always go through [`derive_key`].
pub fn derive_key_with_rounds(password: &str, salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut key);
    key
}

/// Encrypt under a 32-byte key with a fresh random nonce.
///
/// Returns `(nonce, ciphertext)` where the ciphertext carries the 16-byte
/// tag appended by the AEAD.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let nonce: [u8; NONCE_LEN] = generate_random_bytes();
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CellarError::Internal(format!("encryption failed: {e}")))?;
    Ok((nonce, ciphertext))
}

/// Decrypt a `seal` result. Fails closed on any tag mismatch.
pub fn open(key: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CellarError::Crypto("authentication tag mismatch".into()))
}

/// Encrypt into the per-address blob layout: `nonce(12) ‖ tag(16) ‖ ciphertext`.
pub fn seal_blob(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ct_with_tag) = seal(key, plaintext)?;
    let split = ct_with_tag.len() - AUTH_TAG_LEN;
    let (ct, tag) = ct_with_tag.split_at(split);

    let mut blob = Vec::with_capacity(NONCE_LEN + AUTH_TAG_LEN + ct.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(tag);
    blob.extend_from_slice(ct);
    Ok(blob)
}

/// Decrypt the `nonce ‖ tag ‖ ciphertext` blob layout.
pub fn open_blob(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN + AUTH_TAG_LEN {
        return Err(CellarError::Crypto(format!(
            "encrypted blob too short: {} bytes",
            blob.len()
        )));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&blob[..NONCE_LEN]);
    let tag = &blob[NONCE_LEN..NONCE_LEN + AUTH_TAG_LEN];
    let ct = &blob[NONCE_LEN + AUTH_TAG_LEN..];

    // The AEAD expects ciphertext ‖ tag
    let mut ct_with_tag = Vec::with_capacity(ct.len() + AUTH_TAG_LEN);
    ct_with_tag.extend_from_slice(ct);
    ct_with_tag.extend_from_slice(tag);

    open(key, &nonce, &ct_with_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ() {
        let a: [u8; 16] = generate_random_bytes();
        let b: [u8; 16] = generate_random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn derivation_is_deterministic_per_salt() {
        let salt: [u8; SALT_LEN] = generate_random_bytes();
        let k1 = derive_key_with_rounds("correct horse", &salt, 10);
        let k2 = derive_key_with_rounds("correct horse", &salt, 10);
        assert_eq!(k1, k2);

        let other_salt: [u8; SALT_LEN] = generate_random_bytes();
        let k3 = derive_key_with_rounds("correct horse", &other_salt, 10);
        assert_ne!(k1, k3);
    }

    #[test]
    fn production_work_factor_is_600k() {
        assert_eq!(PBKDF2_ITERATIONS, 600_000);
    }

    #[test]
    fn seal_open_roundtrip() {
        let key: [u8; 32] = generate_random_bytes();
        let plaintext = b"the master key";

        let (nonce, ct) = seal(&key, plaintext).unwrap();
        assert_eq!(ct.len(), plaintext.len() + AUTH_TAG_LEN);

        let opened = open(&key, &nonce, &ct).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key: [u8; 32] = generate_random_bytes();
        let other: [u8; 32] = generate_random_bytes();

        let (nonce, ct) = seal(&key, b"secret").unwrap();
        assert!(matches!(
            open(&other, &nonce, &ct),
            Err(CellarError::Crypto(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key: [u8; 32] = generate_random_bytes();
        let (nonce, mut ct) = seal(&key, b"secret").unwrap();
        ct[0] ^= 0x01;
        assert!(open(&key, &nonce, &ct).is_err());
    }

    #[test]
    fn blob_layout_roundtrip() {
        let key: [u8; 32] = generate_random_bytes();
        let material = vec![0x42u8; 96];

        let blob = seal_blob(&key, &material).unwrap();
        assert_eq!(blob.len(), NONCE_LEN + AUTH_TAG_LEN + material.len());

        let opened = open_blob(&key, &blob).unwrap();
        assert_eq!(opened, material);
    }

    #[test]
    fn truncated_blob_rejected() {
        let key: [u8; 32] = generate_random_bytes();
        assert!(open_blob(&key, &[0u8; 20]).is_err());
    }
}
