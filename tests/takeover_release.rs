//! Full takeover and release cycle against a scratch torrc.

use std::path::PathBuf;
use std::sync::Arc;

use onion_cellar::address::SECRET_KEY_FILE_LEN;
use onion_cellar::custody::{AllowList, CustodyManager};
use onion_cellar::registration::material::KeyMaterialStore;
use onion_cellar::registry::store::RegistryStore;
use onion_cellar::takeover::{
    NoopReload, ReleaseOutcome, TakeoverConfig, TakeoverManager, TakeoverOutcome,
};
use onion_cellar::CellarError;

const PEER: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccc.onion";
const PEER_HC: &str = "dddddddddddddddddddddddddddddddddddddddddddddddddddddddd.onion";
const BASE_TORRC: &str = "SocksPort 9050\nDataDirectory /var/lib/tor\n";

struct Fixture {
    dir: tempfile::TempDir,
    custody: Arc<CustodyManager>,
    registry: Arc<RegistryStore>,
    material: Arc<KeyMaterialStore>,
    manager: TakeoverManager,
    torrc_path: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let torrc_path = dir.path().join("torrc");
    std::fs::write(&torrc_path, BASE_TORRC).unwrap();

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
        Arc::clone(&custody),
        Arc::clone(&registry),
        Arc::clone(&material),
        Box::new(NoopReload),
    );
    Fixture {
        dir,
        custody,
        registry,
        material,
        manager,
        torrc_path,
    }
}

fn escrow(f: &Fixture) {
    f.custody.unlock("operator", "password").unwrap();
    let master = f.custody.master_key().unwrap();
    f.material
        .store(PEER, &master, &[9u8; SECRET_KEY_FILE_LEN], &[8u8; 32])
        .unwrap();
    f.registry.upsert(PEER, PEER_HC, "1.0").unwrap();
}

#[test]
fn takeover_then_release_leaves_no_trace() {
    let f = fixture();
    escrow(&f);

    assert_eq!(f.manager.takeover(PEER).unwrap(), TakeoverOutcome::Engaged);

    let hs_dir = f.dir.path().join("hs").join(PEER);
    assert_eq!(
        std::fs::read(hs_dir.join("hs_ed25519_secret_key")).unwrap(),
        vec![9u8; SECRET_KEY_FILE_LEN]
    );
    let torrc = std::fs::read_to_string(&f.torrc_path).unwrap();
    assert!(torrc.contains(&format!("# BEGIN cellar {PEER}")));
    assert!(f.registry.find(PEER).unwrap().unwrap().takeover_active);

    assert_eq!(f.manager.release(PEER).unwrap(), ReleaseOutcome::Released);

    assert_eq!(std::fs::read_to_string(&f.torrc_path).unwrap(), BASE_TORRC);
    assert!(!hs_dir.exists());
    assert!(!f.material.has_material(PEER));
    assert!(!f.registry.find(PEER).unwrap().unwrap().takeover_active);
}

#[test]
fn locked_takeover_mutates_nothing() {
    let f = fixture();
    escrow(&f);
    // Relock as a host restart would.
    std::fs::remove_file(f.dir.path().join(".master-key-unlocked")).unwrap();

    assert!(matches!(
        f.manager.takeover(PEER).unwrap_err(),
        CellarError::Locked
    ));
    assert_eq!(std::fs::read_to_string(&f.torrc_path).unwrap(), BASE_TORRC);
    assert!(!f.dir.path().join("hs").join(PEER).exists());
}

#[test]
fn legacy_plaintext_material_works_without_unlock() {
    let f = fixture();
    // Deposit predates the encrypted store: bare tor key files on disk.
    let addr_dir = f.dir.path().join("keys").join(PEER);
    std::fs::create_dir_all(&addr_dir).unwrap();
    std::fs::write(addr_dir.join("hs_ed25519_secret_key"), [4u8; 96]).unwrap();
    std::fs::write(addr_dir.join("hs_ed25519_public_key"), [3u8; 32]).unwrap();
    f.registry.upsert(PEER, PEER_HC, "0.9").unwrap();

    assert_eq!(f.manager.takeover(PEER).unwrap(), TakeoverOutcome::Engaged);
    let secret = std::fs::read(
        f.dir
            .path()
            .join("hs")
            .join(PEER)
            .join("hs_ed25519_secret_key"),
    )
    .unwrap();
    assert_eq!(secret, vec![4u8; 96]);
}

#[test]
fn release_of_inactive_address_is_a_no_op() {
    let f = fixture();
    escrow(&f);

    assert_eq!(f.manager.release(PEER).unwrap(), ReleaseOutcome::NotActive);
    assert_eq!(std::fs::read_to_string(&f.torrc_path).unwrap(), BASE_TORRC);
    // The escrow is only destroyed by releasing an actual takeover.
    assert!(f.material.has_material(PEER));
}
