//! Engaging and releasing a takeover for a registered peer.
//!
//! A takeover decrypts the escrowed keys, materializes a tor hidden
//! service directory, fences an entry for it into the torrc, and asks tor
//! to reload. Release undoes all of it, including deleting the escrowed
//! material, and is safe to run when nothing is active.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::address::{public_key_file_bytes, validate_onion_address};
use crate::custody::CustodyManager;
use crate::registration::material::KeyMaterialStore;
use crate::registry::store::RegistryStore;
use crate::takeover::reload::ReloadSignal;
use crate::takeover::torrc::TorrcDocument;
use crate::types::Result;
use crate::util::{set_owner_only_dir, write_atomic_secret};

const SECRET_KEY_FILE: &str = "hs_ed25519_secret_key";
const PUBLIC_KEY_FILE: &str = "hs_ed25519_public_key";
const HOSTNAME_FILE: &str = "hostname";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverOutcome {
    Engaged,
    /// The torrc already carries our block for this address.
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// No block was present; nothing to undo.
    NotActive,
}

#[derive(Debug, Clone)]
pub struct TakeoverConfig {
    pub torrc_path: PathBuf,
    /// Base directory under which per-address service dirs are created.
    pub hidden_service_dir: PathBuf,
    /// Local port the redirect responder listens on.
    pub redirect_port: u16,
}

pub struct TakeoverManager {
    config: TakeoverConfig,
    custody: Arc<CustodyManager>,
    registry: Arc<RegistryStore>,
    material: Arc<KeyMaterialStore>,
    reload: Box<dyn ReloadSignal>,
}

impl TakeoverManager {
    pub fn new(
        config: TakeoverConfig,
        custody: Arc<CustodyManager>,
        registry: Arc<RegistryStore>,
        material: Arc<KeyMaterialStore>,
        reload: Box<dyn ReloadSignal>,
    ) -> Self {
        Self {
            config,
            custody,
            registry,
            material,
            reload,
        }
    }

    fn service_dir(&self, content_address: &str) -> PathBuf {
        self.config.hidden_service_dir.join(content_address)
    }

    /// Stand in for a failed peer.
    ///
    /// The key material is decrypted before anything on disk changes, so a
    /// locked master key leaves the torrc and service directory untouched.
    pub fn takeover(&self, content_address: &str) -> Result<TakeoverOutcome> {
        validate_onion_address(content_address)?;

        let mut torrc = TorrcDocument::load(&self.config.torrc_path)?;
        if torrc.has_block(content_address) {
            info!(address = %content_address, "takeover already active");
            return Ok(TakeoverOutcome::AlreadyActive);
        }

        let material = self.material.load(content_address, &self.custody)?;

        let service_dir = self.service_dir(content_address);
        std::fs::create_dir_all(&service_dir)?;
        set_owner_only_dir(&service_dir)?;
        write_atomic_secret(&service_dir.join(SECRET_KEY_FILE), &material.secret_key)?;
        write_atomic_secret(
            &service_dir.join(PUBLIC_KEY_FILE),
            &public_key_file_bytes(&material.public_key),
        )?;
        std::fs::write(
            service_dir.join(HOSTNAME_FILE),
            format!("{}\n", material.hostname),
        )?;

        torrc.insert_block(content_address, &service_dir, self.config.redirect_port);
        torrc.save()?;
        self.registry.set_takeover(content_address, true)?;

        if let Err(e) = self.reload.reload() {
            // The torrc is in place; a later manual reload picks it up.
            warn!(error = %e, "tor reload failed after takeover");
        }
        info!(address = %content_address, dir = %service_dir.display(), "takeover engaged");
        Ok(TakeoverOutcome::Engaged)
    }

    /// Hand the address back and destroy the escrowed material.
    pub fn release(&self, content_address: &str) -> Result<ReleaseOutcome> {
        validate_onion_address(content_address)?;

        let mut torrc = TorrcDocument::load(&self.config.torrc_path)?;
        if !torrc.remove_block(content_address) {
            info!(address = %content_address, "release requested but no takeover was active");
            return Ok(ReleaseOutcome::NotActive);
        }
        torrc.save()?;

        let service_dir = self.service_dir(content_address);
        if service_dir.is_dir() {
            std::fs::remove_dir_all(&service_dir)?;
        }
        self.material.remove(content_address)?;
        self.registry.set_takeover(content_address, false)?;

        if let Err(e) = self.reload.reload() {
            warn!(error = %e, "tor reload failed after release");
        }
        info!(address = %content_address, "takeover released");
        Ok(ReleaseOutcome::Released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{KEY_HEADER_LEN, PUBLIC_KEY_LEN, SECRET_KEY_FILE_LEN};
    use crate::custody::AllowList;
    use crate::types::CellarError;
    use crate::takeover::reload::NoopReload;
    use std::path::Path;

    const ADDR: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.onion";
    const HC: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb.onion";

    struct Fixture {
        _dir: tempfile::TempDir,
        custody: Arc<CustodyManager>,
        registry: Arc<RegistryStore>,
        material: Arc<KeyMaterialStore>,
        manager: TakeoverManager,
        torrc_path: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let torrc_path = dir.path().join("torrc");
        std::fs::write(&torrc_path, "SocksPort 9050\n").unwrap();

        let custody = Arc::new(CustodyManager::with_kdf_rounds(
            dir.path(),
            Box::new(AllowList::new(vec![])),
            10,
        ));
        let registry = Arc::new(RegistryStore::new(dir.path()));
        let material = Arc::new(KeyMaterialStore::new(dir.path()));
        let manager = TakeoverManager::new(
            TakeoverConfig {
                torrc_path: torrc_path.clone(),
                hidden_service_dir: dir.path().join("hs"),
                redirect_port: 8095,
            },
            custody.clone(),
            registry.clone(),
            material.clone(),
            Box::new(NoopReload),
        );
        Fixture {
            _dir: dir,
            custody,
            registry,
            material,
            manager,
            torrc_path,
        }
    }

    fn escrow(f: &Fixture) {
        f.custody.unlock("op", "pw").unwrap();
        let master = f.custody.master_key().unwrap();
        f.material
            .store(ADDR, &master, &[1u8; SECRET_KEY_FILE_LEN], &[2u8; PUBLIC_KEY_LEN])
            .unwrap();
        f.registry.upsert(ADDR, HC, "1.0").unwrap();
    }

    #[test]
    fn takeover_materializes_keys_and_torrc_block() {
        let f = fixture();
        escrow(&f);

        assert_eq!(f.manager.takeover(ADDR).unwrap(), TakeoverOutcome::Engaged);

        let service_dir = f.manager.service_dir(ADDR);
        let secret = std::fs::read(service_dir.join("hs_ed25519_secret_key")).unwrap();
        assert_eq!(secret.len(), SECRET_KEY_FILE_LEN);
        let public = std::fs::read(service_dir.join("hs_ed25519_public_key")).unwrap();
        assert_eq!(public.len(), KEY_HEADER_LEN + PUBLIC_KEY_LEN);
        assert!(public.starts_with(b"== ed25519v1-public: type0 =="));

        let torrc = std::fs::read_to_string(&f.torrc_path).unwrap();
        assert!(torrc.contains(&format!("# BEGIN cellar {ADDR}")));
        assert!(torrc.contains("HiddenServicePort 80 127.0.0.1:8095"));

        let entry = f.registry.find(ADDR).unwrap().unwrap();
        assert!(entry.takeover_active);
    }

    #[test]
    fn takeover_is_idempotent() {
        let f = fixture();
        escrow(&f);
        f.manager.takeover(ADDR).unwrap();
        assert_eq!(
            f.manager.takeover(ADDR).unwrap(),
            TakeoverOutcome::AlreadyActive
        );
    }

    #[test]
    fn locked_takeover_leaves_everything_untouched() {
        let f = fixture();
        escrow(&f);
        // Relock by removing the unlocked handle.
        std::fs::remove_file(f._dir.path().join(".master-key-unlocked")).unwrap();

        let before = std::fs::read_to_string(&f.torrc_path).unwrap();
        assert!(matches!(
            f.manager.takeover(ADDR).unwrap_err(),
            CellarError::Locked
        ));
        assert_eq!(std::fs::read_to_string(&f.torrc_path).unwrap(), before);
        assert!(!f.manager.service_dir(ADDR).exists());
    }

    #[test]
    fn release_restores_torrc_and_destroys_material() {
        let f = fixture();
        escrow(&f);
        let before = std::fs::read_to_string(&f.torrc_path).unwrap();

        f.manager.takeover(ADDR).unwrap();
        assert_eq!(f.manager.release(ADDR).unwrap(), ReleaseOutcome::Released);

        assert_eq!(std::fs::read_to_string(&f.torrc_path).unwrap(), before);
        assert!(!f.manager.service_dir(ADDR).exists());
        assert!(!f.material.has_material(ADDR));
        assert!(!f.registry.find(ADDR).unwrap().unwrap().takeover_active);
    }

    #[test]
    fn release_without_takeover_is_a_safe_no_op() {
        let f = fixture();
        escrow(&f);
        assert_eq!(f.manager.release(ADDR).unwrap(), ReleaseOutcome::NotActive);
        assert!(Path::new(&f.torrc_path).is_file());
    }
}
