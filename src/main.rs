//! Onion Cellar - mutual backup and failover for onion services

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onion_cellar::custody::{AllowList, CustodyManager};
use onion_cellar::poller::PeerPoller;
use onion_cellar::registration::material::KeyMaterialStore;
use onion_cellar::registry::store::RegistryStore;
use onion_cellar::takeover::{TakeoverConfig, TakeoverManager, TorReload};
use onion_cellar::{server, AppState, CellarError, Cli, Command};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = cli.args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("onion_cellar={log_level},info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> onion_cellar::Result<()> {
    let args = cli.args;
    let custody = Arc::new(CustodyManager::new(
        &args.data_dir,
        Box::new(AllowList::from_config(args.operators.as_deref())),
    ));
    let registry = Arc::new(RegistryStore::new(&args.data_dir));
    let material = Arc::new(KeyMaterialStore::new(&args.data_dir));

    match cli.command {
        Command::Serve => {
            info!("======================================");
            info!("  Onion Cellar v{}", env!("CARGO_PKG_VERSION"));
            info!("  commit {} built {}", env!("GIT_COMMIT_SHORT"), env!("BUILD_TIMESTAMP"));
            info!("======================================");
            info!("Data dir: {}", args.data_dir.display());
            info!("Healthcheck listen: {}", args.listen);
            info!("Redirect listen: {}", args.redirect_listen);
            info!("Archive: {}", args.archive_address);
            info!("======================================");

            let redirect_listen = args.redirect_listen;
            let archive = args.archive_address.clone();
            let state = Arc::new(AppState::new(args));

            // Watch registered peers; takes over after repeated failures
            // and releases when they come back.
            let manager = Arc::new(TakeoverManager::new(
                TakeoverConfig {
                    torrc_path: state.args.torrc_path.clone(),
                    hidden_service_dir: state.args.hidden_service_dir.clone(),
                    redirect_port: state.args.redirect_listen.port(),
                },
                Arc::clone(&state.custody),
                Arc::clone(&state.registry),
                Arc::clone(&state.material),
                Box::new(TorReload::new(&state.args.tor_pid_file)),
            ));
            let socks = (!state.args.tor_socks.is_empty()).then(|| state.args.tor_socks.clone());
            let poller = Arc::new(PeerPoller::new(
                Arc::clone(&state.registry),
                manager,
                Arc::clone(&state.custody),
                socks.as_deref(),
            ));
            tokio::spawn(poller.run());

            let redirect = tokio::spawn(onion_cellar::redirect::run(redirect_listen, archive));
            let endpoint = server::run(state);

            tokio::select! {
                r = endpoint => r,
                r = redirect => r.map_err(|e| CellarError::Internal(format!("redirect task panicked: {e}")))?,
            }
        }

        Command::Unlock { operator_id } => {
            let password = prompt_password("Operator password")?;
            custody.unlock(&operator_id, &password)?;
            info!(operator = %operator_id, "master key unlocked");

            let master = custody.master_key()?;
            let migrated = material.migrate_legacy(&master)?;
            if migrated > 0 {
                info!(count = migrated, "encrypted legacy key material");
            }
            Ok(())
        }

        Command::Passwd { operator_id } => {
            let password = prompt_password("New operator password")?;
            custody.reencrypt_slot(&operator_id, &password)?;
            info!(operator = %operator_id, "key slot re-encrypted");
            Ok(())
        }

        Command::Revoke { operator_id } => {
            custody.revoke_slot(&operator_id)?;
            info!(operator = %operator_id, "key slot revoked");
            Ok(())
        }

        Command::Takeover { content_address } => {
            let manager = takeover_manager(&args, custody, registry, material);
            manager.takeover(&content_address)?;
            Ok(())
        }

        Command::Release { content_address } => {
            let manager = takeover_manager(&args, custody, registry, material);
            manager.release(&content_address)?;
            Ok(())
        }

        Command::Status => {
            if custody.is_unlocked() {
                println!("master key: unlocked");
            } else {
                println!("master key: LOCKED");
            }
            let entries = registry.load()?;
            if entries.is_empty() {
                println!("registry: empty");
            } else {
                for e in entries {
                    println!(
                        "{}  status={:?}  takeover={}  registered={}",
                        e.content_address, e.status, e.takeover_active, e.registered_at
                    );
                }
            }
            Ok(())
        }
    }
}

fn takeover_manager(
    args: &onion_cellar::Args,
    custody: Arc<CustodyManager>,
    registry: Arc<RegistryStore>,
    material: Arc<KeyMaterialStore>,
) -> TakeoverManager {
    if !custody.is_unlocked() {
        warn!("master key is locked; only legacy plaintext material can be used");
    }
    TakeoverManager::new(
        TakeoverConfig {
            torrc_path: args.torrc_path.clone(),
            hidden_service_dir: args.hidden_service_dir.clone(),
            redirect_port: args.redirect_listen.port(),
        },
        custody,
        registry,
        material,
        Box::new(TorReload::new(&args.tor_pid_file)),
    )
}

fn prompt_password(prompt: &str) -> onion_cellar::Result<String> {
    dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| CellarError::Internal(format!("password prompt failed: {e}")))
}
