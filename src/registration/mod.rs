//! Peer registration: validate, encrypt, persist.

pub mod material;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::address::{normalize_secret_key, validate_onion_address, validate_public_key};
use crate::custody::CustodyManager;
use crate::registry::store::{RegistryStore, Upsert};
use crate::types::{CellarError, Result};

use material::KeyMaterialStore;

/// Body of a `POST /register` request from a peer instance.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub content_address: String,
    pub healthcheck_address: String,
    /// Base64 of the tor `hs_ed25519_secret_key` file (96 bytes, or the
    /// bare 64-byte expanded key).
    pub secret_key: String,
    /// Base64 of the bare 32-byte ed25519 public key.
    pub public_key: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub registered: bool,
    pub content_address: String,
    pub message: String,
}

pub struct RegistrationService {
    custody: Arc<CustodyManager>,
    registry: Arc<RegistryStore>,
    material: Arc<KeyMaterialStore>,
}

impl RegistrationService {
    pub fn new(
        custody: Arc<CustodyManager>,
        registry: Arc<RegistryStore>,
        material: Arc<KeyMaterialStore>,
    ) -> Self {
        Self {
            custody,
            registry,
            material,
        }
    }

    /// Accept a peer's key escrow and record it in the registry.
    ///
    /// Validation happens before any decrypt attempt so a malformed request
    /// never reports the locked state. Nothing is written unless every
    /// field checks out and the master key is available.
    pub fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse> {
        validate_onion_address(&req.content_address)?;
        validate_onion_address(&req.healthcheck_address)?;

        let secret_raw = Zeroizing::new(
            BASE64
                .decode(&req.secret_key)
                .map_err(|_| CellarError::Validation("secret_key is not valid base64".into()))?,
        );
        let public_raw = BASE64
            .decode(&req.public_key)
            .map_err(|_| CellarError::Validation("public_key is not valid base64".into()))?;

        let secret = normalize_secret_key(&secret_raw)?;
        validate_public_key(&public_raw)?;

        let master = self.custody.master_key().map_err(|e| {
            if matches!(e, CellarError::Locked) {
                warn!(
                    content_address = %req.content_address,
                    "registration refused: master key locked"
                );
            }
            e
        })?;

        self.material
            .store(&req.content_address, &master, &secret, &public_raw)?;

        let outcome = self.registry.upsert(
            &req.content_address,
            &req.healthcheck_address,
            req.version.as_deref().unwrap_or("unknown"),
        )?;

        let message = match outcome {
            Upsert::Created => "instance registered".to_string(),
            Upsert::Updated => "registration refreshed".to_string(),
        };
        info!(
            content_address = %req.content_address,
            healthcheck_address = %req.healthcheck_address,
            outcome = ?outcome,
            "registration accepted"
        );

        Ok(RegisterResponse {
            registered: true,
            content_address: req.content_address.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{SECRET_KEY_FILE_LEN, SECRET_KEY_LEN};
    use crate::custody::AllowList;

    const ADDR_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.onion";
    const ADDR_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb.onion";

    fn service(dir: &std::path::Path) -> RegistrationService {
        let custody = Arc::new(CustodyManager::with_kdf_rounds(
            dir,
            Box::new(AllowList::new(vec![])),
            10,
        ));
        RegistrationService::new(
            custody,
            Arc::new(RegistryStore::new(dir)),
            Arc::new(KeyMaterialStore::new(dir)),
        )
    }

    fn valid_request() -> RegisterRequest {
        RegisterRequest {
            content_address: ADDR_A.to_string(),
            healthcheck_address: ADDR_B.to_string(),
            secret_key: BASE64.encode(normalize_secret_key(&[1u8; SECRET_KEY_LEN]).unwrap()),
            public_key: BASE64.encode([2u8; 32]),
            version: Some("1.4.2".to_string()),
        }
    }

    #[test]
    fn register_while_locked_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let err = svc.register(&valid_request()).unwrap_err();
        assert!(matches!(err, CellarError::Locked));
        assert!(!svc.material.has_material(ADDR_A));
        assert!(svc.registry.load().unwrap().is_empty());
    }

    #[test]
    fn validation_runs_before_the_locked_check() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let mut req = valid_request();
        req.content_address = "not-an-onion".to_string();
        assert!(matches!(
            svc.register(&req).unwrap_err(),
            CellarError::Validation(_)
        ));

        let mut req = valid_request();
        req.secret_key = "***".to_string();
        assert!(matches!(
            svc.register(&req).unwrap_err(),
            CellarError::Validation(_)
        ));
    }

    #[test]
    fn register_then_reregister_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.custody.unlock("op", "pw").unwrap();

        let resp = svc.register(&valid_request()).unwrap();
        assert!(resp.registered);
        assert_eq!(resp.content_address, ADDR_A);

        let mut again = valid_request();
        again.version = Some("1.5.0".to_string());
        svc.register(&again).unwrap();

        let entries = svc.registry.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "1.5.0");
        assert!(svc.material.has_material(ADDR_A));
    }

    #[test]
    fn bare_64_byte_secret_key_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        svc.custody.unlock("op", "pw").unwrap();

        let mut req = valid_request();
        req.secret_key = BASE64.encode([3u8; 64]);
        svc.register(&req).unwrap();

        let material = svc.material.load(ADDR_A, &svc.custody).unwrap();
        assert_eq!(material.secret_key.len(), SECRET_KEY_FILE_LEN);
    }
}
