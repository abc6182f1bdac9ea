//! Onion Cellar - mutual backup and failover for onion services
//!
//! Two (or more) operators escrow each other's onion service keys. When
//! one site goes dark, its peer can take over the address, pointing
//! visitors at an archived copy until the site returns.
//!
//! ## Services
//!
//! - **Custody**: an encrypted master key with one password slot per operator
//! - **Registration**: peers deposit encrypted copies of their onion keys
//! - **Healthcheck**: status endpoint and message relay polled by peers
//! - **Poller**: watch registered peers, take over at three straight
//!   failures, release on recovery
//! - **Takeover**: materialize escrowed keys into tor and reload it
//! - **Redirect**: answer a taken-over address with archive redirects

pub mod address;
pub mod config;
pub mod custody;
pub mod poller;
pub mod redirect;
pub mod registration;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod server;
pub mod status;
pub mod takeover;
pub mod types;
pub mod util;

pub use config::{Args, Cli, Command};
pub use server::{run, AppState};
pub use types::{CellarError, Result};
