//! Per-address encrypted key material.
//!
//! Each registered address owns a directory `keys/<address>/` holding
//! `secret.enc`, `public.enc` (both `nonce ‖ tag ‖ ciphertext` under the
//! master key) and a plaintext `hostname` file. Early deployments stored
//! the raw tor key files unencrypted; those are migrated on unlock.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::address::{PUBLIC_KEY_LEN, SECRET_KEY_FILE_LEN};
use crate::custody::crypto::{open_blob, seal_blob, MASTER_KEY_LEN};
use crate::custody::CustodyManager;
use crate::types::{CellarError, Result};
use crate::util::{set_owner_only, set_owner_only_dir, write_atomic_secret};

/// Directory under the data dir holding per-address material.
pub const KEYS_DIR: &str = "keys";

const SECRET_ENC: &str = "secret.enc";
const PUBLIC_ENC: &str = "public.enc";
const HOSTNAME: &str = "hostname";

// Legacy plaintext file names, as deposited before encryption-at-rest.
const LEGACY_SECRET: &str = "hs_ed25519_secret_key";
const LEGACY_PUBLIC: &str = "hs_ed25519_public_key";

/// Decrypted key material as needed during takeover.
#[derive(Debug)]
pub struct KeyMaterial {
    /// Full 96-byte tor secret key file content.
    pub secret_key: Vec<u8>,
    /// Bare 32-byte public key.
    pub public_key: Vec<u8>,
    /// The onion hostname this material serves.
    pub hostname: String,
}

pub struct KeyMaterialStore {
    keys_dir: PathBuf,
}

impl KeyMaterialStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: data_dir.into().join(KEYS_DIR),
        }
    }

    fn addr_dir(&self, content_address: &str) -> PathBuf {
        self.keys_dir.join(content_address)
    }

    /// Whether any material (encrypted or legacy) exists for an address.
    pub fn has_material(&self, content_address: &str) -> bool {
        let dir = self.addr_dir(content_address);
        dir.join(SECRET_ENC).is_file() || dir.join(LEGACY_SECRET).is_file()
    }

    /// Encrypt and store a peer's key material under the master key.
    pub fn store(
        &self,
        content_address: &str,
        master: &[u8; MASTER_KEY_LEN],
        secret_key: &[u8],
        public_key: &[u8],
    ) -> Result<()> {
        debug_assert_eq!(secret_key.len(), SECRET_KEY_FILE_LEN);
        debug_assert_eq!(public_key.len(), PUBLIC_KEY_LEN);

        let dir = self.addr_dir(content_address);
        std::fs::create_dir_all(&dir)?;
        set_owner_only_dir(&dir)?;

        let secret_blob = seal_blob(master, secret_key)?;
        let public_blob = seal_blob(master, public_key)?;

        write_atomic_secret(&dir.join(SECRET_ENC), &secret_blob)?;
        write_atomic_secret(&dir.join(PUBLIC_ENC), &public_blob)?;
        std::fs::write(dir.join(HOSTNAME), format!("{content_address}\n"))?;
        Ok(())
    }

    /// Load and decrypt material for takeover.
    ///
    /// Encrypted material requires the unlocked custody manager and
    /// propagates its distinct locked condition; legacy plaintext material
    /// is usable without it. No material at all is a fatal precondition.
    pub fn load(&self, content_address: &str, custody: &CustodyManager) -> Result<KeyMaterial> {
        let dir = self.addr_dir(content_address);

        let hostname = std::fs::read_to_string(dir.join(HOSTNAME))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| content_address.to_string());

        if dir.join(SECRET_ENC).is_file() {
            let master = custody.master_key()?;
            let secret_blob = std::fs::read(dir.join(SECRET_ENC))?;
            let public_blob = std::fs::read(dir.join(PUBLIC_ENC))?;
            return Ok(KeyMaterial {
                secret_key: open_blob(&master, &secret_blob)?,
                public_key: open_blob(&master, &public_blob)?,
                hostname,
            });
        }

        if dir.join(LEGACY_SECRET).is_file() {
            return Ok(KeyMaterial {
                secret_key: std::fs::read(dir.join(LEGACY_SECRET))?,
                public_key: std::fs::read(dir.join(LEGACY_PUBLIC))?,
                hostname,
            });
        }

        Err(CellarError::Validation(format!(
            "no key material stored for {content_address}"
        )))
    }

    /// Delete all stored material for an address (invoked on release).
    pub fn remove(&self, content_address: &str) -> Result<()> {
        let dir = self.addr_dir(content_address);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Scan for legacy plaintext key files and encrypt them in place.
    ///
    /// Defense-in-depth cleanup run after every successful unlock, not part
    /// of the request hot path. Returns the number of migrated addresses.
    pub fn migrate_legacy(&self, master: &[u8; MASTER_KEY_LEN]) -> Result<usize> {
        let entries = match std::fs::read_dir(&self.keys_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut migrated = 0;
        for entry in entries {
            let dir = entry?.path();
            let legacy_secret = dir.join(LEGACY_SECRET);
            if !legacy_secret.is_file() {
                continue;
            }

            let secret = std::fs::read(&legacy_secret)?;
            let public = std::fs::read(dir.join(LEGACY_PUBLIC)).unwrap_or_default();

            write_atomic_secret(&dir.join(SECRET_ENC), &seal_blob(master, &secret)?)?;
            write_atomic_secret(&dir.join(PUBLIC_ENC), &seal_blob(master, &public)?)?;
            set_owner_only(&dir.join(SECRET_ENC))?;

            std::fs::remove_file(&legacy_secret)?;
            let legacy_public = dir.join(LEGACY_PUBLIC);
            if legacy_public.is_file() {
                std::fs::remove_file(&legacy_public)?;
            }

            migrated += 1;
            info!(dir = %dir.display(), "migrated legacy plaintext key material");
        }

        if migrated > 0 {
            warn!(count = migrated, "legacy unencrypted key material was present on disk");
        }
        Ok(migrated)
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }
}
