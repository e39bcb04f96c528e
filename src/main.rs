//! hotkey-manager: host process for global hotkeys
//!
//! Registers the hotkeys named in `HOTKEY_MANAGER_BINDINGS`, logs every
//! press and unregisters everything on shutdown.

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hotkey_manager::lifecycle::ShutdownSignal;
use hotkey_manager::{Config, HotkeyManager, LoopMode};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "hotkey-manager starting"
    );

    // Load configuration
    let mut config = Config::load()?;
    if config.loop_mode == LoopMode::Hosted {
        // The async runtime does not pump a native message loop
        warn!("hosted message loop is not available in the host process, using a dedicated one");
        config.loop_mode = LoopMode::Dedicated;
    }
    info!(bindings = config.bindings.len(), "configuration loaded");

    let shutdown = ShutdownSignal::new();

    let manager = HotkeyManager::init_global(config.manager_options())
        .context("failed to start hotkey manager")?;
    let mut events = manager.events();

    let mut registered = 0;
    for hotkey in &config.bindings {
        match manager.register_hotkey(*hotkey) {
            Some(_) => registered += 1,
            None => warn!(%hotkey, "hotkey unavailable - already taken by another application?"),
        }
    }

    if registered == 0 {
        warn!("no hotkeys registered");
    }

    info!(registered, "hotkey manager initialized, entering main loop");

    // Main event loop
    tokio::select! {
        _ = async {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        info!(
                            id = %event.id,
                            key = %event.key,
                            modifiers = %event.modifiers,
                            "hotkey pressed"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "hotkey event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            error!("hotkey event stream closed");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    let released = tokio::task::block_in_place(|| manager.shutdown());

    info!(released, "hotkey-manager stopped");

    Ok(())
}
