//! Onion address and key blob validation.
//!
//! A v3 onion address is exactly 56 base32 characters (`a-z`, `2-7`)
//! followed by the `.onion` suffix. Key material arrives base64-encoded:
//! the secret key in tor's on-disk file format (32-byte tagged header plus
//! 64 bytes of expanded key), the public key as the bare 32 bytes.

use crate::types::{CellarError, Result};

/// Length of the base32 portion of a v3 onion address.
pub const ONION_BASE32_LEN: usize = 56;

/// Tag prefix of tor's `hs_ed25519_secret_key` file.
pub const SECRET_KEY_HEADER: &[u8] = b"== ed25519v1-secret: type0 ==";

/// Tag prefix of tor's `hs_ed25519_public_key` file.
pub const PUBLIC_KEY_HEADER: &[u8] = b"== ed25519v1-public: type0 ==";

/// Header length in both tor key files (tag, NUL-padded).
pub const KEY_HEADER_LEN: usize = 32;

/// Expanded ed25519 secret key length.
pub const SECRET_KEY_LEN: usize = 64;

/// Full secret key file length: header + expanded key.
pub const SECRET_KEY_FILE_LEN: usize = KEY_HEADER_LEN + SECRET_KEY_LEN;

/// Ed25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Validate the fixed-length base32-plus-suffix onion address grammar.
pub fn validate_onion_address(addr: &str) -> Result<()> {
    let base = addr.strip_suffix(".onion").ok_or_else(|| {
        CellarError::Validation(format!("address must end in .onion: {addr}"))
    })?;

    if base.len() != ONION_BASE32_LEN {
        return Err(CellarError::Validation(format!(
            "address must be {ONION_BASE32_LEN} base32 characters, got {}",
            base.len()
        )));
    }

    if !base
        .bytes()
        .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
    {
        return Err(CellarError::Validation(format!(
            "address contains characters outside the base32 alphabet: {addr}"
        )));
    }

    Ok(())
}

/// Validate a secret key blob and normalize it to the 96-byte file form.
///
/// Accepts either the full tor key file (header + 64 bytes) or the bare
/// 64-byte expanded key, mirroring what instances extract from their tor
/// container. Anything else is rejected before any mutation happens.
pub fn normalize_secret_key(bytes: &[u8]) -> Result<Vec<u8>> {
    match bytes.len() {
        SECRET_KEY_FILE_LEN => {
            if !bytes.starts_with(SECRET_KEY_HEADER) {
                return Err(CellarError::Validation(
                    "secret key header mismatch: expected ed25519v1-secret tag".into(),
                ));
            }
            Ok(bytes.to_vec())
        }
        SECRET_KEY_LEN => {
            let mut full = Vec::with_capacity(SECRET_KEY_FILE_LEN);
            full.extend_from_slice(SECRET_KEY_HEADER);
            full.resize(KEY_HEADER_LEN, 0);
            full.extend_from_slice(bytes);
            Ok(full)
        }
        n => Err(CellarError::Validation(format!(
            "secret key must be {SECRET_KEY_FILE_LEN} or {SECRET_KEY_LEN} bytes, got {n}"
        ))),
    }
}

/// Validate a public key blob (bare 32 bytes).
pub fn validate_public_key(bytes: &[u8]) -> Result<()> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(CellarError::Validation(format!(
            "public key must be {PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Build the on-disk `hs_ed25519_public_key` file content (header + key).
pub fn public_key_file_bytes(public_key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(KEY_HEADER_LEN + public_key.len());
    full.extend_from_slice(PUBLIC_KEY_HEADER);
    full.resize(KEY_HEADER_LEN, 0);
    full.extend_from_slice(public_key);
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_ADDR: &str =
        "archivep75mbjunhxcn6x4j5mwjmomyxb573v42baldlqu56ruiloiad.onion";

    #[test]
    fn accepts_valid_v3_address() {
        assert!(validate_onion_address(GOOD_ADDR).is_ok());
    }

    #[test]
    fn rejects_missing_suffix() {
        assert!(validate_onion_address(&GOOD_ADDR.replace(".onion", "")).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(validate_onion_address("short.onion").is_err());
        let long = format!("{}a.onion", &GOOD_ADDR[..GOOD_ADDR.len() - 6]);
        assert!(validate_onion_address(&long).is_err());
    }

    #[test]
    fn rejects_bad_alphabet() {
        // '1' and uppercase are outside the base32 alphabet tor uses
        let bad = format!("{}1.onion", &GOOD_ADDR[..55]);
        assert!(validate_onion_address(&bad).is_err());
        assert!(validate_onion_address(&GOOD_ADDR.to_uppercase()).is_err());
    }

    #[test]
    fn normalizes_bare_64_byte_secret_key() {
        let bare = [7u8; SECRET_KEY_LEN];
        let full = normalize_secret_key(&bare).unwrap();
        assert_eq!(full.len(), SECRET_KEY_FILE_LEN);
        assert!(full.starts_with(SECRET_KEY_HEADER));
        assert_eq!(&full[KEY_HEADER_LEN..], &bare[..]);
    }

    #[test]
    fn accepts_full_file_form() {
        let bare = [9u8; SECRET_KEY_LEN];
        let full = normalize_secret_key(&bare).unwrap();
        let again = normalize_secret_key(&full).unwrap();
        assert_eq!(full, again);
    }

    #[test]
    fn rejects_corrupt_header() {
        let mut full = normalize_secret_key(&[1u8; SECRET_KEY_LEN]).unwrap();
        full[0] = b'X';
        assert!(normalize_secret_key(&full).is_err());
    }

    #[test]
    fn rejects_odd_key_sizes() {
        assert!(normalize_secret_key(&[0u8; 32]).is_err());
        assert!(validate_public_key(&[0u8; 31]).is_err());
        assert!(validate_public_key(&[0u8; PUBLIC_KEY_LEN]).is_ok());
    }

    #[test]
    fn public_key_file_has_tagged_header() {
        let file = public_key_file_bytes(&[3u8; PUBLIC_KEY_LEN]);
        assert_eq!(file.len(), KEY_HEADER_LEN + PUBLIC_KEY_LEN);
        assert!(file.starts_with(PUBLIC_KEY_HEADER));
    }
}
