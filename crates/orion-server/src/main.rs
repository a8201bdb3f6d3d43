//! # orion-server
//!
//! LAN relay between a desktop and the phones on the same network.
//!
//! This binary provides:
//! - **REST API** (axum) for posting text and files, clearing the log,
//!   reading and updating settings, and downloading uploads
//! - **WebSocket push** so every open client sees the item log as it changes
//! - **Now-playing relay** from the desktop to phones, forgotten after ten
//!   minutes without a refresh
//! - **Retention sweep** that drops items older than the configured age

mod api;
mod config;
mod error;
mod hub;
mod media;
mod registry;
mod session;
mod uploads;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use orion_shared::constants::APP_NAME;
use orion_store::{ItemStore, SettingsStore};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::RelayHub;
use crate::media::MediaState;
use crate::registry::ConnectionRegistry;
use crate::uploads::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,orion_server=debug,orion_store=debug")
        }))
        .init();

    info!("Starting {} relay v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let settings = Arc::new(SettingsStore::open(&config.data_dir).await);
    let current = settings.current().await;
    info!(
        host = %current.host,
        port = %current.port,
        retention_days = current.retention_days,
        "Loaded settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let items = Arc::new(ItemStore::new(&config.data_dir));
    let existing = items
        .load_all()
        .await
        .with_context(|| format!("reading {}", items.path().display()))?;
    info!(items = existing.len(), path = %items.path().display(), "Item log ready");

    let uploads = Arc::new(UploadStore::new(config.uploads_dir(), config.max_upload_size).await?);

    let hub = RelayHub::new(
        items,
        Arc::new(ConnectionRegistry::new()),
        Arc::new(MediaState::new(config.media_ttl)),
    );

    let app_state = AppState {
        hub: hub.clone(),
        settings: settings.clone(),
        uploads,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Retention sweep; the setting is re-read each round so edits apply
    // without a restart.
    let sweep_settings = settings.clone();
    let sweep_period = config.retention_sweep;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_period);
        loop {
            interval.tick().await;
            let Some(max_age) = sweep_settings.current().await.retention() else {
                continue;
            };
            if let Err(e) = hub.sweep_retention(chrono::Utc::now() - max_age).await {
                warn!(error = %e, "Retention sweep failed");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Bind the listener
    // -----------------------------------------------------------------------
    let listener = match config.http_addr {
        Some(addr) => tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?,
        None => {
            let port: u16 = current
                .port
                .trim()
                .parse()
                .with_context(|| format!("invalid port in settings: {:?}", current.port))?;
            api::bind(&current.host, port, config.port_attempts)
                .await
                .with_context(|| format!("binding {}", current.bind_addr()))?
        }
    };

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, listener) => {
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
