// SPDX-License-Identifier: GPL-3.0-only
mod api;
mod config;
mod extension;
mod gallery;
mod host;
mod inventory;
mod logging;
mod orchestrator;
mod reconcile;
mod settings;
mod utils;
mod watcher;

#[cfg(test)]
mod test_helpers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use api::HttpServer;
use config::Config;
use gallery::HttpGallery;
use host::DirectoryHost;
use inventory::{ExtensionInventory, Gallery, HostInventory, InventoryAdapter};
use logging::{setup_logging, ActivityLog};
use orchestrator::Orchestrator;
use reconcile::{EngineOptions, ReconciliationEngine};
use watcher::{NotifyWatcher, Watcher, WatcherEvent};

/// Quiet period after a file event before acting on it
const DEBOUNCE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = Config::path();
    let config = Config::load()?;

    // Initialize logging
    let file_logging = setup_logging(&config.log_level, config.file_log_dir())?;

    info!("Starting ExtensionSync v{}", env!("CARGO_PKG_VERSION"));

    let log = ActivityLog::tracing();

    // Host inventory and remote gallery
    tokio::fs::create_dir_all(&config.extensions_dir).await?;
    let host: Arc<dyn HostInventory> = Arc::new(DirectoryHost::new(config.extensions_dir.clone()));
    let gallery: Arc<dyn Gallery> = Arc::new(HttpGallery::new(&config.gallery_url, config.download_dir.clone())?);
    info!(extensions = %config.extensions_dir.display(), gallery = %config.gallery_url, "Inventory initialized");

    let inventory: Arc<dyn ExtensionInventory> = Arc::new(InventoryAdapter::new(host, gallery, log.clone()));
    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&inventory),
        log.clone(),
        EngineOptions {
            auto_update: config.auto_update_extensions,
            drain_timeout: config.drain_timeout(),
            ..EngineOptions::default()
        },
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        config_path.clone(),
        inventory,
        engine,
        log,
    )
    .with_file_logging(file_logging));

    orchestrator.on_startup().await;

    // Start watchers
    let orchestrator_watch = Arc::clone(&orchestrator);
    let watcher_task = tokio::spawn(async move {
        info!("Watcher task started");
        if let Err(e) = run_watchers(orchestrator_watch, config_path).await {
            error!(error = %e, "Watcher task failed");
        }
    });

    // Start HTTP server
    let http_server = HttpServer::new(Arc::clone(&orchestrator), config.local_api_bind);
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve().await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");

    watcher_task.abort();
    http_task.abort();
    orchestrator.on_shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

/// React to edits of the settings file and of the configuration file
async fn run_watchers(orchestrator: Arc<Orchestrator>, config_path: PathBuf) -> anyhow::Result<()> {
    let mut settings_watcher = NotifyWatcher::new();
    let mut settings_events = settings_watcher.watch(orchestrator.settings_path().await).await?;

    let mut config_watcher = NotifyWatcher::new();
    let mut config_events = config_watcher.watch(config_path).await?;

    loop {
        tokio::select! {
            Some(event) = settings_events.recv() => {
                settle(&mut settings_events).await;
                debug!(path = %event.path().display(), "Settings file event");
                orchestrator.on_settings_file_changed().await;
            }
            Some(event) = config_events.recv() => {
                settle(&mut config_events).await;
                if matches!(event, WatcherEvent::Remove(_)) {
                    continue;
                }
                let new_config = match Config::load() {
                    Ok(new_config) => new_config,
                    Err(e) => {
                        warn!(error = %e, "Ignoring unreadable configuration change");
                        continue;
                    }
                };
                if new_config == orchestrator.config().await {
                    continue;
                }

                info!("Configuration changed");
                let previous = orchestrator.settings_path().await;
                orchestrator.on_config_changed(new_config).await;
                let current = orchestrator.settings_path().await;
                if current != previous {
                    settings_events = settings_watcher.watch(current).await?;
                }
            }
            else => break,
        }
    }

    settings_watcher.stop().await?;
    config_watcher.stop().await?;
    Ok(())
}

/// Swallow the burst of events a single save usually produces
async fn settle(events: &mut mpsc::Receiver<WatcherEvent>) {
    while let Ok(Some(_)) = tokio::time::timeout(DEBOUNCE, events.recv()).await {}
}
