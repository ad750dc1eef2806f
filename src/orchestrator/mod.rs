// SPDX-License-Identifier: GPL-3.0-only
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use crate::config::Config;
use crate::extension::ExtensionRecord;
use crate::inventory::ExtensionInventory;
use crate::logging::{ActivityLog, FileLogging};
use crate::reconcile::{EngineStatus, ReconciliationEngine, SyncSummary};
use crate::settings::{resolve_settings_dir, SettingsStore};

/// Wires host lifecycle events to the reconciliation engine and the
/// settings store.
pub struct Orchestrator {
    config: RwLock<Config>,
    config_path: PathBuf,
    store: RwLock<SettingsStore>,
    inventory: Arc<dyn ExtensionInventory>,
    engine: Arc<ReconciliationEngine>,
    file_logging: Option<FileLogging>,
    log: ActivityLog,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        inventory: Arc<dyn ExtensionInventory>,
        engine: Arc<ReconciliationEngine>,
        log: ActivityLog,
    ) -> Self {
        let store = SettingsStore::in_dir(&config.settings_dir, log.clone());
        Self {
            config: RwLock::new(config),
            config_path,
            store: RwLock::new(store),
            inventory,
            engine,
            file_logging: None,
            log,
        }
    }

    /// Re-target the log file when the configuration changes
    pub fn with_file_logging(mut self, file_logging: FileLogging) -> Self {
        self.file_logging = Some(file_logging);
        self
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn settings_path(&self) -> PathBuf {
        self.store.read().await.path().to_path_buf()
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    pub fn installed(&self) -> anyhow::Result<Vec<ExtensionRecord>> {
        self.inventory.list_installed()
    }

    /// Resolve the settings location, then run the first pass
    pub async fn on_startup(&self) -> SyncSummary {
        self.resolve_store().await;
        self.synchronize().await
    }

    pub async fn on_settings_file_changed(&self) -> SyncSummary {
        self.log.emit("Settings file changed; synchronizing extensions");
        self.synchronize().await
    }

    /// Apply edited configuration values and persist the snapshot to the
    /// (possibly moved) settings file
    pub async fn on_config_changed(&self, new_config: Config) -> bool {
        self.engine.set_auto_update(new_config.auto_update_extensions);
        if let Some(file_logging) = &self.file_logging {
            match file_logging.apply(new_config.file_log_dir()) {
                Ok(true) => info!(log_dir = ?file_logging.log_dir(), "File logging reconfigured"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to reconfigure file logging"),
            }
        }
        {
            let mut config = self.config.write().await;
            *config = new_config;
        }
        self.resolve_store().await;
        self.persist().await
    }

    pub async fn on_shutdown(&self) {
        let in_flight = self.engine.status().pending;
        if !in_flight.is_empty() {
            self.log.emit(format!(
                "Shutting down with {} extension install(s) still in progress; they are not saved: {}",
                in_flight.len(),
                in_flight.join(", ")
            ));
        }
        self.persist().await;
        self.engine.shutdown();
        info!("Orchestrator shut down");
    }

    /// Run one reconciliation pass against the current settings file
    pub async fn synchronize(&self) -> SyncSummary {
        let (declared, updated_at) = {
            let store = self.store.read().await;
            (store.load(), store.last_modified())
        };
        let summary = self.engine.synchronize(&declared, updated_at);
        info!(
            batch = summary.batch,
            scheduled = summary.scheduled.len(),
            removed = summary.removed.len(),
            "Synchronization pass finished"
        );
        summary
    }

    /// Write the installed snapshot to the settings file
    pub async fn persist(&self) -> bool {
        let installed = match self.inventory.list_installed() {
            Ok(installed) => installed,
            Err(e) => {
                self.log.emit(format!(
                    "Error while listing installed extensions: {:#}",
                    e
                ));
                return false;
            }
        };
        self.store.read().await.save(&installed)
    }

    async fn resolve_store(&self) {
        let dir = {
            let mut config = self.config.write().await;
            resolve_settings_dir(&mut config, &self.config_path, &self.log)
        };

        let mut store = self.store.write().await;
        let resolved = SettingsStore::in_dir(&dir, self.log.clone());
        if resolved.path() != store.path() {
            warn!(from = %store.path().display(), to = %resolved.path().display(), "Settings file moved");
        }
        *store = resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Gallery, HostInventory, InventoryAdapter};
    use crate::reconcile::EngineOptions;
    use crate::logging::setup::{file_logging, LOG_FILE_NAME};
    use crate::test_helpers::{
        create_temp_dir, create_test_config, recording_log, FakeGallery, FakeHost, FakeInventory, LogLines,
    };
    use semver::Version;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    struct Fixture {
        _dir: TempDir,
        host: Arc<FakeHost>,
        gallery: Arc<FakeGallery>,
        orchestrator: Orchestrator,
        lines: LogLines,
    }

    fn fixture() -> Fixture {
        let dir = create_temp_dir();
        let mut config = create_test_config();
        config.settings_dir = dir.path().join("settings");
        std::fs::create_dir_all(&config.settings_dir).unwrap();

        let (log, lines) = recording_log();
        let host = Arc::new(FakeHost::new());
        let gallery = Arc::new(FakeGallery::new());
        let inventory: Arc<dyn ExtensionInventory> = Arc::new(InventoryAdapter::new(
            Arc::clone(&host) as Arc<dyn HostInventory>,
            Arc::clone(&gallery) as Arc<dyn Gallery>,
            log.clone(),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&inventory),
            log.clone(),
            EngineOptions {
                drain_timeout: Duration::from_secs(5),
                ..EngineOptions::default()
            },
        ));
        let orchestrator = Orchestrator::new(
            config,
            dir.path().join("config.toml"),
            inventory,
            engine,
            log,
        );

        Fixture {
            _dir: dir,
            host,
            gallery,
            orchestrator,
            lines,
        }
    }

    async fn wait_until_idle(orchestrator: &Orchestrator) {
        for _ in 0..200 {
            if !orchestrator.status().attached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch never drained");
    }

    #[tokio::test]
    async fn test_startup_installs_declared_and_removes_undeclared() {
        let f = fixture();
        f.host.add_user(ExtensionRecord::new("Old Tool", "old.tool"));
        f.gallery.publish(FakeGallery::entry("Web Essentials", "web.essentials", "1.0.0"));
        let store = SettingsStore::new(f.orchestrator.settings_path().await, ActivityLog::discard());
        assert!(store.save(&[ExtensionRecord::new("Web Essentials", "web.essentials")]));

        let summary = f.orchestrator.on_startup().await;
        assert_eq!(summary.scheduled, ["web.essentials"]);
        assert_eq!(summary.removed, ["old.tool"]);

        wait_until_idle(&f.orchestrator).await;
        let ids: Vec<String> = f.orchestrator.installed().unwrap().into_iter().map(|r| r.identifier).collect();
        assert_eq!(ids, ["web.essentials"]);
        assert!(f.lines.contains("Installed Web Essentials"));
    }

    #[tokio::test]
    async fn test_startup_without_settings_file_changes_nothing() {
        let f = fixture();
        f.host.add_user(ExtensionRecord::new("Keep Me", "keep.me"));

        let summary = f.orchestrator.on_startup().await;

        assert!(summary.skipped);
        assert!(f.host.uninstall_calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_persists_installed_snapshot() {
        let f = fixture();
        f.host.add_user(ExtensionRecord::new("A", "a").with_version(Version::new(1, 0, 0)));
        f.host.add_user(ExtensionRecord::new("B", "b"));

        f.orchestrator.on_shutdown().await;

        let store = SettingsStore::new(f.orchestrator.settings_path().await, ActivityLog::discard());
        let ids: Vec<String> = store.load().into_records().into_iter().map(|r| r.identifier).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_config_change_moves_settings_and_applies_auto_update() {
        let f = fixture();
        f.host.add_user(ExtensionRecord::new("A", "a"));
        let new_dir = create_temp_dir();
        let mut config = f.orchestrator.config().await;
        config.settings_dir = new_dir.path().to_path_buf();
        config.auto_update_extensions = false;

        assert!(f.orchestrator.on_config_changed(config).await);

        assert_eq!(
            f.orchestrator.settings_path().await,
            new_dir.path().join(crate::settings::store::SETTINGS_FILE_NAME)
        );
        assert!(new_dir.path().join(crate::settings::store::SETTINGS_FILE_NAME).exists());
        assert!(!f.orchestrator.config().await.auto_update_extensions);

        // With auto-update off, installed extensions are not re-checked
        let summary = f.orchestrator.on_settings_file_changed().await;
        assert!(summary.scheduled.is_empty());
        assert!(f.lines.contains("Settings file changed"));
    }

    #[tokio::test]
    async fn test_config_change_toggles_file_logging() {
        let log_dir = create_temp_dir();
        let (layer, handle) = file_logging(None).unwrap();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));
        let f = fixture();
        let orchestrator = f.orchestrator.with_file_logging(handle.clone());

        let mut config = orchestrator.config().await;
        config.logging_enabled = true;
        config.log_dir = log_dir.path().to_path_buf();
        orchestrator.on_config_changed(config.clone()).await;
        assert_eq!(handle.log_dir().as_deref(), Some(log_dir.path()));
        tracing::info!("reaches the log file");

        config.logging_enabled = false;
        orchestrator.on_config_changed(config).await;
        assert_eq!(handle.log_dir(), None);
        tracing::info!("stays on the console");

        let contents = std::fs::read_to_string(log_dir.path().join(LOG_FILE_NAME)).unwrap();
        assert!(contents.contains("reaches the log file"));
        assert!(!contents.contains("stays on the console"));
    }

    #[tokio::test]
    async fn test_shutdown_reports_installs_still_in_flight() {
        let dir = create_temp_dir();
        let mut config = create_test_config();
        config.settings_dir = dir.path().to_path_buf();
        let (log, lines) = recording_log();
        // Never completes anything, so the batch stays pending
        let inventory: Arc<dyn ExtensionInventory> = Arc::new(FakeInventory::with_installed(vec![]));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&inventory),
            log.clone(),
            EngineOptions::default(),
        ));
        let orchestrator = Orchestrator::new(config, dir.path().join("config.toml"), inventory, engine, log);
        assert!(SettingsStore::in_dir(dir.path(), ActivityLog::discard()).save(&[ExtensionRecord::new("Slow", "slow")]));

        orchestrator.on_startup().await;
        assert_eq!(orchestrator.status().pending, ["slow"]);

        orchestrator.on_shutdown().await;
        assert!(lines.contains("1 extension install(s) still in progress"));
        assert!(lines.contains("slow"));
        assert!(!orchestrator.status().attached);
    }
}
