//! Command-line interface.

use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::accounts::{Account, Role};
use crate::config;
use crate::store::{secret, AccountStore};

#[derive(Parser)]
#[command(name = "deskgate", about = "Support console gateway", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway server (default).
    Start,
    /// Create an admin account in the store. Fails if the identifier is
    /// already taken.
    CreateAdmin {
        /// Login identifier (stored lowercased).
        identifier: String,
        /// Plaintext secret; hashed before storage.
        secret: String,
        /// Display name.
        #[arg(long, default_value = "Administrator")]
        name: String,
        /// Optional department label.
        #[arg(long)]
        department: Option<String>,
    },
    /// Print version information.
    Version,
}

/// Seed an admin account directly into the on-disk store.
///
/// Runs against the store file without a live server; refuses to duplicate
/// an existing identifier.
pub fn handle_create_admin(
    identifier: &str,
    secret_plain: &str,
    name: &str,
    department: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = config::load_config()?.effective_store_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = AccountStore::open(&path)?;

    let account = Account {
        id: Uuid::new_v4().to_string(),
        identifier: identifier.trim().to_lowercase(),
        secret_hash: secret::hash_secret(secret_plain)?,
        role: Role::Admin,
        display_name: name.to_string(),
        department: department.map(str::to_string),
        active: true,
        last_login_at: None,
        created_at: Utc::now(),
    };
    store.insert(account.clone())?;
    println!("Created admin account {} ({})", account.identifier, account.id);
    Ok(())
}

pub fn handle_version() {
    println!("deskgate {}", env!("CARGO_PKG_VERSION"));
}
