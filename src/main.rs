//! Command line entry point: starts the store backend, reconciles against
//! the mirror when one is configured, and keeps the mirror drain worker and
//! order subscription running.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use mahfoor_store::{config::StoreConfig, mirror, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    mahfoor_store::init_tracing();

    let data_dir = std::env::var("MAHFOOR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"));
    let config_path = data_dir.join("config.json");

    let config = StoreConfig::load(&config_path)
        .map_err(|e| anyhow::anyhow!(e))
        .context("loading configuration")?;
    let state = AppState::init(config, &data_dir)
        .map_err(|e| anyhow::anyhow!(e))
        .context("initializing application state")?;

    let poll = Duration::from_secs(state.config.mirror_poll_secs);

    let Some(client) = state.mirror.clone() else {
        info!("No mirror configured, running local-only");
        wait_for_shutdown().await;
        return Ok(());
    };

    if client.wait_until_available().await {
        match client.fetch_orders().await {
            Ok(snapshot) => {
                info!(orders = snapshot.len(), "Reconciling from remote snapshot");
                if let Err(e) = state.reconcile_orders(snapshot) {
                    warn!("Remote reconciliation failed: {e}");
                }
            }
            Err(e) => warn!("Initial remote fetch failed: {e}"),
        }
    }

    // Subscription snapshots only refresh the in-memory cache; the durable
    // store keeps unmirrored orders until the drain worker gets them across.
    let snapshot_state = Arc::clone(&state);
    let _subscription = mirror::subscribe_orders(client.clone(), poll, move |snapshot| {
        if let Err(e) = snapshot_state.apply_remote_snapshot(snapshot) {
            warn!("Applying remote snapshot failed: {e}");
        }
    });

    let drain_state = Arc::clone(&state);
    let drain_client = client;
    tokio::spawn(async move {
        loop {
            if let Err(e) = mirror::drain_pending(&drain_state.db, &drain_client).await {
                warn!("Mirror drain pass failed: {e}");
            }
            tokio::time::sleep(poll * 2).await;
        }
    });

    wait_for_shutdown().await;
    Ok(())
}

async fn wait_for_shutdown() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
