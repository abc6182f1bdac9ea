//! Key Custody Manager
//!
//! Owns the master secret's lifecycle: generation on first unlock,
//! per-operator encrypted slots, and the on-disk unlocked-key handle that
//! gates every decrypt operation.

pub mod crypto;
pub mod manager;
pub mod slots;

pub use manager::{
    AllowList, CustodyManager, OperatorAuthorizer, SLOT_STORE_FILE, UNLOCKED_HANDLE_FILE,
};
pub use slots::{KeySlot, SlotStore};
