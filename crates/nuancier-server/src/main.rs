//! # nuancier-server
//!
//! HTTP back end for the Nuancier color catalog.
//!
//! This binary provides:
//! - **Public catalog** reads: sections, groups, colors and their galleries
//! - **Back-office API** (axum) for managers and admins to edit groups,
//!   colors and images, behind a trusted sign-in header
//! - **Account management** with temporary passwords and mailed reset links
//! - **Media storage** for gallery images on local disk

mod accounts;
mod api;
mod auth;
mod catalog;
mod config;
mod error;
mod media_store;

use std::sync::Arc;

use nuancier_store::Database;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::accounts::{Accounts, Argon2Hasher, LogMailer};
use crate::api::AppState;
use crate::catalog::Catalog;
use crate::config::ServerConfig;
use crate::media_store::MediaStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,nuancier_server=debug,nuancier_store=debug")
            }),
        )
        .init();

    info!("Starting Nuancier server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = Arc::new(ServerConfig::from_env());
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(db));

    let media = Arc::new(
        MediaStore::new(
            config.media_root.clone(),
            config.media_base_url.clone(),
            config.max_upload_size,
        )
        .await?,
    );

    let accounts = Arc::new(Accounts::new(
        db.clone(),
        Arc::new(Argon2Hasher),
        Arc::new(LogMailer),
        config.clone(),
    ));

    if let Some(email) = &config.bootstrap_admin_email {
        if let Some(admin) = accounts.bootstrap_admin(email).await? {
            info!(email = %admin.email, "Temporary password sent to the bootstrap administrator");
        }
    }

    let app_state = AppState {
        catalog: Catalog::new(db, media),
        accounts: accounts.clone(),
        config: config.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Expired reset links (every 30 minutes)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1800));
        loop {
            interval.tick().await;
            match accounts.purge_expired_tokens().await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Removed expired reset links"),
                Err(e) => warn!(error = %e, "Reset link cleanup failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
