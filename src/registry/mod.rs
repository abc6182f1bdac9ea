//! Registry of peer instances that have deposited key material.
//!
//! Entries are created and updated only through registration and are never
//! auto-deleted; pruning permanently dead addresses is operational policy.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::{RegistryStore, Upsert, REGISTRY_FILE};

/// Health status as maintained by the external monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Healthy,
    Degraded,
    Unreachable,
}

/// One registered peer instance, keyed by content address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub content_address: String,
    pub healthcheck_address: String,
    pub registered_at: DateTime<Utc>,
    pub version: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub last_healthcheck: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub takeover_active: bool,
}

impl RegistryEntry {
    /// A fresh entry as created on first registration.
    pub fn new(content_address: &str, healthcheck_address: &str, version: &str) -> Self {
        Self {
            content_address: content_address.to_string(),
            healthcheck_address: healthcheck_address.to_string(),
            registered_at: Utc::now(),
            version: version.to_string(),
            status: InstanceStatus::Healthy,
            last_healthcheck: None,
            fail_count: 0,
            takeover_active: false,
        }
    }
}
