//! Configuration for the cellar daemon and CLI.
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::redirect::WAYBACK_ONION;

/// Onion Cellar - mutual backup and failover for onion services
#[derive(Parser, Debug)]
#[command(name = "cellar")]
#[command(about = "Key escrow, health reporting and takeover for onion service peers")]
pub struct Cli {
    #[command(flatten)]
    pub args: Args,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Args {
    /// Directory holding the slot store, registry and escrowed keys
    #[arg(long, env = "CELLAR_DATA_DIR", default_value = "/var/lib/onioncellar")]
    pub data_dir: PathBuf,

    /// Address the healthcheck endpoint listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Address the redirect responder listens on
    #[arg(long, env = "REDIRECT_LISTEN", default_value = "127.0.0.1:8095")]
    pub redirect_listen: SocketAddr,

    /// tor configuration file mutated during takeover and release
    #[arg(long, env = "TORRC_PATH", default_value = "/etc/tor/torrc")]
    pub torrc_path: PathBuf,

    /// tor pid file, used to signal a config reload
    #[arg(long, env = "TOR_PID_FILE", default_value = "/run/tor/tor.pid")]
    pub tor_pid_file: PathBuf,

    /// Base directory for materialized hidden service dirs
    #[arg(long, env = "HIDDEN_SERVICE_DIR", default_value = "/var/lib/tor/cellar")]
    pub hidden_service_dir: PathBuf,

    /// This instance's content onion address
    #[arg(long, env = "CONTENT_ADDRESS", default_value = "")]
    pub content_address: String,

    /// This instance's healthcheck onion address
    #[arg(long, env = "HEALTHCHECK_ADDRESS", default_value = "")]
    pub healthcheck_address: String,

    /// URL probed to decide whether the content site is reachable
    #[arg(long, env = "CONTENT_URL")]
    pub content_url: Option<String>,

    /// URL of the content site's own JSON status document
    #[arg(long, env = "CONTENT_STATUS_URL")]
    pub content_status_url: Option<String>,

    /// Archive host visitors are redirected to during a takeover
    #[arg(long, env = "ARCHIVE_ADDRESS", default_value = WAYBACK_ONION)]
    pub archive_address: String,

    /// SOCKS proxy for probing peer onion addresses (empty disables)
    #[arg(long, env = "TOR_SOCKS", default_value = "socks5h://127.0.0.1:9050")]
    pub tor_socks: String,

    /// Comma-separated operator ids allowed to unlock (empty allows any)
    #[arg(long, env = "OPERATORS")]
    pub operators: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the healthcheck endpoint and redirect responder
    Serve,
    /// Unlock the master key with an operator password
    Unlock {
        /// Operator identifier owning the key slot
        operator_id: String,
    },
    /// Re-encrypt an operator's key slot under a new password
    Passwd {
        operator_id: String,
    },
    /// Remove an operator's key slot
    Revoke {
        operator_id: String,
    },
    /// Stand in for a failed peer instance
    Takeover {
        /// Content onion address of the peer to take over
        content_address: String,
    },
    /// Hand a taken-over address back and destroy its escrowed keys
    Release {
        content_address: String,
    },
    /// Print registry and lock state
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cli = Cli::parse_from(["cellar", "serve"]);
        assert_eq!(cli.args.listen.port(), 8080);
        assert_eq!(cli.args.redirect_listen.port(), 8095);
        assert_eq!(cli.args.archive_address, WAYBACK_ONION);
        assert!(matches!(cli.command, Command::Serve));
    }

    #[test]
    fn takeover_takes_an_address() {
        let cli = Cli::parse_from(["cellar", "takeover", "x.onion"]);
        match cli.command {
            Command::Takeover { content_address } => assert_eq!(content_address, "x.onion"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
