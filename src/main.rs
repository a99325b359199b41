use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use deskgate::cli::{self, Cli, Command};
use deskgate::config;
use deskgate::logging;
use deskgate::server::startup::{run_server_with_config, ServerConfig};
use deskgate::server::GatewayState;
use deskgate::store::AccountStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server().await,

        Some(Command::CreateAdmin {
            identifier,
            secret,
            name,
            department,
        }) => {
            init_logging_from_env()?;
            cli::handle_create_admin(&identifier, &secret, &name, department.as_deref())
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;
    let cfg = config::load_config()?;

    let store_path = cfg.effective_store_path();
    if let Some(parent) = store_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(
        AccountStore::open_with_retry(&store_path, 3, Duration::from_millis(500)).await?,
    );
    if store.is_empty() {
        info!(
            path = %store_path.display(),
            "account store is empty; seed one with `deskgate create-admin`"
        );
    }

    let state = Arc::new(GatewayState::from_config(&cfg, store));
    let bind = cfg.bind;
    let handle = run_server_with_config(ServerConfig {
        state,
        bind_address: bind,
    })
    .await?;
    info!(addr = %handle.local_addr(), "gateway listening");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    handle.shutdown().await;
    info!("gateway shut down");
    Ok(())
}

/// Initialize logging based on the DESKGATE_DEV environment variable.
fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if std::env::var("DESKGATE_DEV")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
    {
        logging::LogConfig::development()
    } else {
        logging::LogConfig::production()
    };
    logging::init_logging(log_config)?;
    Ok(())
}
