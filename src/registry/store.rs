//! Flat-file registry repository.
//!
//! The registry is one JSON array (`registry.json`). Every mutation is a
//! read-modify-write of the whole record under an in-process mutex, written
//! back by atomic rename, so two racing registrations cannot interleave a
//! lost update and readers never see a torn file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use crate::types::{CellarError, Result};
use crate::util::write_atomic;

use super::{InstanceStatus, RegistryEntry};

/// File name of the registry record.
pub const REGISTRY_FILE: &str = "registry.json";

/// Whether an upsert created a fresh entry or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

pub struct RegistryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RegistryStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(REGISTRY_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Read all entries. An absent file is an empty registry.
    pub fn load(&self) -> Result<Vec<RegistryEntry>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CellarError::Internal(format!("corrupt registry: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up one entry by content address.
    pub fn find(&self, content_address: &str) -> Result<Option<RegistryEntry>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|e| e.content_address == content_address))
    }

    /// Idempotent upsert keyed by content address.
    ///
    /// A known address gets its healthcheck address, version, and timestamp
    /// refreshed in place; an unknown one is appended as a fresh healthy
    /// entry. No duplicate entry is ever created.
    pub fn upsert(
        &self,
        content_address: &str,
        healthcheck_address: &str,
        version: &str,
    ) -> Result<Upsert> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let mut entries = self.load()?;

        let outcome = match entries
            .iter_mut()
            .find(|e| e.content_address == content_address)
        {
            Some(entry) => {
                entry.healthcheck_address = healthcheck_address.to_string();
                entry.version = version.to_string();
                entry.registered_at = Utc::now();
                Upsert::Updated
            }
            None => {
                entries.push(RegistryEntry::new(
                    content_address,
                    healthcheck_address,
                    version,
                ));
                Upsert::Created
            }
        };

        self.save(&entries)?;
        debug!(address = %content_address, ?outcome, "registry upsert");
        Ok(outcome)
    }

    /// Flip the takeover flag for an address, if it is registered.
    pub fn set_takeover(&self, content_address: &str, active: bool) -> Result<()> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let mut entries = self.load()?;
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.content_address == content_address)
        {
            entry.takeover_active = active;
            entry.status = if active {
                InstanceStatus::Unreachable
            } else {
                InstanceStatus::Healthy
            };
            self.save(&entries)?;
        }
        Ok(())
    }

    /// Record a healthcheck result for an address, if it is registered.
    pub fn record_healthcheck(&self, content_address: &str, healthy: bool) -> Result<()> {
        let _guard = self.lock.lock().expect("registry lock poisoned");
        let mut entries = self.load()?;
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.content_address == content_address)
        {
            entry.last_healthcheck = Some(Utc::now());
            if healthy {
                entry.fail_count = 0;
                if !entry.takeover_active {
                    entry.status = InstanceStatus::Healthy;
                }
            } else {
                entry.fail_count += 1;
                entry.status = InstanceStatus::Degraded;
            }
            self.save(&entries)?;
        }
        Ok(())
    }

    fn save(&self, entries: &[RegistryEntry]) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| CellarError::Internal(format!("registry serialization: {e}")))?;
        write_atomic(&self.path, &json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
