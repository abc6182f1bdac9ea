//! Takeover orchestration: torrc edits, key materialization, tor reload.

pub mod manager;
pub mod reload;
pub mod torrc;

pub use manager::{ReleaseOutcome, TakeoverConfig, TakeoverManager, TakeoverOutcome};
pub use reload::{NoopReload, ReloadSignal, TorReload};
pub use torrc::TorrcDocument;
