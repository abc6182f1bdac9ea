//! Master key lifecycle and per-operator slot management.
//!
//! The master key exists in three states: absent, locked (encrypted slot
//! copies only), unlocked (raw key present in the `.master-key-unlocked`
//! handle file). The handle's mere presence is the authorization boundary
//! for every decrypt operation in the process — and for any other process
//! sharing this volume, which is the intended trust scope.
//!
//! There is no automatic re-lock; the handle persists until the host
//! restarts and clears it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::types::{CellarError, Result};
use crate::util::write_atomic_secret;

use super::crypto::{
    derive_key_with_rounds, generate_random_bytes, open, seal, AUTH_TAG_LEN, MASTER_KEY_LEN,
    NONCE_LEN, PBKDF2_ITERATIONS, SALT_LEN,
};
use super::slots::{KeySlot, SlotStore};

/// File name of the version-tagged slot record.
pub const SLOT_STORE_FILE: &str = "master-key.json";

/// File name of the unlocked-key handle (raw 32 bytes, owner-only).
pub const UNLOCKED_HANDLE_FILE: &str = ".master-key-unlocked";

/// Authorization capability consulted at the unlock boundary.
///
/// Custody logic stays oblivious to how operator identity is authenticated;
/// the surrounding system injects whatever check it trusts.
pub trait OperatorAuthorizer: Send + Sync {
    fn is_privileged(&self, operator_id: &str) -> bool;
}

/// Allow-list authorizer. An empty list admits any operator, which matches
/// deployments where authentication already happened upstream.
pub struct AllowList {
    operators: Vec<String>,
}

impl AllowList {
    pub fn new(operators: Vec<String>) -> Self {
        Self { operators }
    }

    /// Parse a comma-separated operator list from configuration.
    pub fn from_config(value: Option<&str>) -> Self {
        let operators = value
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { operators }
    }
}

impl OperatorAuthorizer for AllowList {
    fn is_privileged(&self, operator_id: &str) -> bool {
        self.operators.is_empty() || self.operators.iter().any(|o| o == operator_id)
    }
}

/// Owns the slot store and unlocked-key handle for one cellar instance.
pub struct CustodyManager {
    data_dir: PathBuf,
    authorizer: Box<dyn OperatorAuthorizer>,
    kdf_rounds: u32,
    /// Serializes read-modify-write cycles on the slot record.
    store_lock: Mutex<()>,
}

impl CustodyManager {
    pub fn new(data_dir: impl Into<PathBuf>, authorizer: Box<dyn OperatorAuthorizer>) -> Self {
        Self {
            data_dir: data_dir.into(),
            authorizer,
            kdf_rounds: PBKDF2_ITERATIONS,
            store_lock: Mutex::new(()),
        }
    }

    /// Test constructor with a reduced KDF work factor.
    pub fn with_kdf_rounds(
        data_dir: impl Into<PathBuf>,
        authorizer: Box<dyn OperatorAuthorizer>,
        kdf_rounds: u32,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            authorizer,
            kdf_rounds,
            store_lock: Mutex::new(()),
        }
    }

    fn store_path(&self) -> PathBuf {
        self.data_dir.join(SLOT_STORE_FILE)
    }

    fn handle_path(&self) -> PathBuf {
        self.data_dir.join(UNLOCKED_HANDLE_FILE)
    }

    /// Whether the unlocked-key handle is present.
    pub fn is_unlocked(&self) -> bool {
        self.handle_path().is_file()
    }

    /// Read the master key from the handle, or report the locked condition.
    pub fn master_key(&self) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>> {
        let bytes = match std::fs::read(self.handle_path()) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CellarError::Locked)
            }
            Err(e) => return Err(e.into()),
        };
        let key: [u8; MASTER_KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CellarError::Internal("unlocked handle has wrong length".into()))?;
        Ok(Zeroizing::new(key))
    }

    /// Unlock the cellar for an operator.
    ///
    /// Three branches:
    /// (a) empty slot store — generate the master key and create the first
    ///     slot under this operator's password;
    /// (b) the operator has a slot — derive and decrypt, persisting the
    ///     handle on success;
    /// (c) no slot but the cellar is already unlocked — lazily enroll a
    ///     fresh slot for this operator, keeping custody access in sync with
    ///     privilege grants made elsewhere.
    ///
    /// Wrong password and unknown operator are indistinguishable in the
    /// result: both are `LoginFailed`.
    pub fn unlock(&self, operator_id: &str, password: &str) -> Result<()> {
        if !self.authorizer.is_privileged(operator_id) {
            debug!(operator = %operator_id, "unlock refused: operator not privileged");
            return Err(CellarError::LoginFailed);
        }

        let _guard = self.store_lock.lock().expect("slot store lock poisoned");
        let mut store = SlotStore::load(&self.store_path())?;

        if store.is_empty() {
            // First unlock ever: this operator becomes the first key holder.
            let master = Zeroizing::new(generate_random_bytes::<MASTER_KEY_LEN>());
            let slot = self.new_slot(&master, password)?;
            store.insert(operator_id, slot);
            store.save(&self.store_path())?;
            self.persist_handle(&master)?;
            info!(operator = %operator_id, "master key generated, cellar unlocked");
            return Ok(());
        }

        if let Some(slot) = store.get(operator_id) {
            let (salt, nonce, ct) = slot.decode()?;
            let derived = derive_key_with_rounds(password, &salt, self.kdf_rounds);
            let nonce: [u8; NONCE_LEN] = nonce
                .try_into()
                .map_err(|_| CellarError::Internal("slot nonce has wrong length".into()))?;
            // Tag mismatch means wrong password; fold it into the generic
            // login failure so the response carries no oracle.
            let plaintext = open(&derived, &nonce, &ct).map_err(|_| CellarError::LoginFailed)?;
            let key: [u8; MASTER_KEY_LEN] = plaintext
                .as_slice()
                .try_into()
                .map_err(|_| CellarError::LoginFailed)?;
            let master = Zeroizing::new(key);
            self.persist_handle(&master)?;
            info!(operator = %operator_id, "cellar unlocked");
            return Ok(());
        }

        if self.is_unlocked() {
            let master = self.master_key()?;
            let slot = self.new_slot(&master, password)?;
            store.insert(operator_id, slot);
            store.save(&self.store_path())?;
            info!(operator = %operator_id, "enrolled new key slot on unlocked cellar");
            return Ok(());
        }

        debug!(operator = %operator_id, "unlock failed: no slot and cellar locked");
        Err(CellarError::LoginFailed)
    }

    /// Replace an operator's slot under a new password. Requires the cellar
    /// to be unlocked; uses the same encryption contract as initial creation.
    pub fn reencrypt_slot(&self, operator_id: &str, new_password: &str) -> Result<()> {
        let master = self.master_key()?;

        let _guard = self.store_lock.lock().expect("slot store lock poisoned");
        let mut store = SlotStore::load(&self.store_path())?;
        if store.get(operator_id).is_none() {
            return Err(CellarError::Validation(format!(
                "operator {operator_id} has no key slot"
            )));
        }
        let slot = self.new_slot(&master, new_password)?;
        store.insert(operator_id, slot);
        store.save(&self.store_path())?;
        info!(operator = %operator_id, "key slot re-encrypted");
        Ok(())
    }

    /// Delete one operator's slot. Does not rotate the master key or touch
    /// other slots; revocation does not undo access the operator already had.
    pub fn revoke_slot(&self, operator_id: &str) -> Result<()> {
        let _guard = self.store_lock.lock().expect("slot store lock poisoned");
        let mut store = SlotStore::load(&self.store_path())?;
        if !store.remove(operator_id) {
            return Err(CellarError::Validation(format!(
                "operator {operator_id} has no key slot"
            )));
        }
        store.save(&self.store_path())?;
        info!(operator = %operator_id, "key slot revoked");
        Ok(())
    }

    fn new_slot(&self, master: &[u8; MASTER_KEY_LEN], password: &str) -> Result<KeySlot> {
        let salt: [u8; SALT_LEN] = generate_random_bytes();
        let derived = derive_key_with_rounds(password, &salt, self.kdf_rounds);
        let (nonce, ct_with_tag) = seal(&derived, master)?;
        let split = ct_with_tag.len() - AUTH_TAG_LEN;
        Ok(KeySlot::from_parts(
            &salt,
            &nonce,
            &ct_with_tag[..split],
            &ct_with_tag[split..],
        ))
    }

    fn persist_handle(&self, master: &[u8; MASTER_KEY_LEN]) -> Result<()> {
        write_atomic_secret(&self.handle_path(), master.as_slice())?;
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
