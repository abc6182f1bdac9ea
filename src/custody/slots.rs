//! Per-operator key slots.
//!
//! Each slot is an encrypted copy of the master key under a key derived
//! from that operator's password. The whole mapping is one version-tagged
//! record (`master-key.json`), always written atomically as a unit.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CellarError, Result};
use crate::util::write_atomic;

/// Current slot store record version.
pub const SLOT_STORE_VERSION: u32 = 1;

/// One operator's encrypted copy of the master key.
///
/// Binary fields are base64 in the persisted record. Decrypting with the
/// key derived from the right password yields the master key exactly; any
/// other password fails the authentication tag, never producing
/// silently-wrong plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySlot {
    /// Key derivation salt (16 bytes, base64)
    pub salt: String,
    /// AEAD nonce (12 bytes, base64)
    pub iv: String,
    /// Encrypted master key without the tag (base64)
    pub ciphertext: String,
    /// Poly1305 authentication tag (16 bytes, base64)
    pub tag: String,
    /// When this slot was created or last re-encrypted
    pub created_at: DateTime<Utc>,
}

impl KeySlot {
    /// Assemble a slot from raw crypto outputs.
    pub fn from_parts(salt: &[u8], nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> Self {
        Self {
            salt: BASE64.encode(salt),
            iv: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
            tag: BASE64.encode(tag),
            created_at: Utc::now(),
        }
    }

    /// Decode the base64 fields back to `(salt, nonce, ciphertext ‖ tag)`.
    pub fn decode(&self) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let salt = BASE64
            .decode(&self.salt)
            .map_err(|e| CellarError::Internal(format!("invalid salt encoding: {e}")))?;
        let nonce = BASE64
            .decode(&self.iv)
            .map_err(|e| CellarError::Internal(format!("invalid nonce encoding: {e}")))?;
        let mut ct = BASE64
            .decode(&self.ciphertext)
            .map_err(|e| CellarError::Internal(format!("invalid ciphertext encoding: {e}")))?;
        let tag = BASE64
            .decode(&self.tag)
            .map_err(|e| CellarError::Internal(format!("invalid tag encoding: {e}")))?;
        ct.extend_from_slice(&tag);
        Ok((salt, nonce, ct))
    }
}

/// The persisted mapping from operator identity to key slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotStore {
    pub version: u32,
    pub slots: BTreeMap<String, KeySlot>,
}

impl Default for SlotStore {
    fn default() -> Self {
        Self {
            version: SLOT_STORE_VERSION,
            slots: BTreeMap::new(),
        }
    }
}

impl SlotStore {
    /// Load the record, treating an absent file as an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CellarError::Internal(format!("corrupt slot store: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the whole record atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CellarError::Internal(format!("slot store serialization: {e}")))?;
        write_atomic(path, &json)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, operator_id: &str) -> Option<&KeySlot> {
        self.slots.get(operator_id)
    }

    pub fn insert(&mut self, operator_id: &str, slot: KeySlot) {
        self.slots.insert(operator_id.to_string(), slot);
    }

    pub fn remove(&mut self, operator_id: &str) -> bool {
        self.slots.remove(operator_id).is_some()
    }
}
