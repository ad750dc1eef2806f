// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use semver::Version;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use crate::config::Config;
use crate::extension::{
    parse_version, DownloadedPackage, ExtensionKind, ExtensionRecord, GalleryEntry, InstalledExtension,
};
use crate::inventory::{ExtensionInventory, Gallery, HostInventory, InstallContext, InstallEvent};
use crate::logging::ActivityLog;

/// Create a test configuration with temporary paths
pub fn create_test_config() -> Config {
    let temp_dir = std::env::temp_dir().join(format!("extension-sync-test-{}", uuid::Uuid::new_v4()));

    Config {
        settings_dir: temp_dir.join("settings"),
        log_dir: temp_dir.join("logs"),
        logging_enabled: false,
        auto_update_extensions: true,
        extensions_dir: temp_dir.join("extensions"),
        download_dir: temp_dir.join("downloads"),
        gallery_url: "http://localhost:3000".to_string(),
        local_api_bind: SocketAddr::from_str("127.0.0.1:0").unwrap(), // Use port 0 to auto-assign
        drain_timeout_secs: 5,
        log_level: "error".to_string(), // Reduce log noise in tests
    }
}

/// Create a temporary directory for tests
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::TempDir::new().expect("Failed to create temp directory")
}

/// Lines captured by [`recording_log`]
#[derive(Clone, Default)]
pub struct LogLines(Arc<Mutex<Vec<String>>>);

impl LogLines {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().unwrap().iter().any(|line| line.contains(needle))
    }
}

/// Activity log that records every line
pub fn recording_log() -> (ActivityLog, LogLines) {
    let lines = LogLines::default();
    let sink = lines.clone();
    let log = ActivityLog::new(move |line| sink.0.lock().unwrap().push(line.to_string()));
    (log, lines)
}

/// In-memory host add-on manager
#[derive(Default)]
pub struct FakeHost {
    installed: Mutex<Vec<InstalledExtension>>,
    fail_install: Mutex<HashSet<String>>,
    fail_uninstall: Mutex<HashSet<String>>,
    install_calls: Mutex<Vec<String>>,
    uninstall_calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, record: ExtensionRecord) {
        self.installed.lock().unwrap().push(InstalledExtension::user(record));
    }

    pub fn add_system(&self, record: ExtensionRecord) {
        self.installed.lock().unwrap().push(InstalledExtension {
            record,
            kind: ExtensionKind::System,
        });
    }

    pub fn fail_install_for(&self, identifier: &str) {
        self.fail_install.lock().unwrap().insert(identifier.to_string());
    }

    pub fn fail_uninstall_for(&self, identifier: &str) {
        self.fail_uninstall.lock().unwrap().insert(identifier.to_string());
    }

    pub fn install_calls(&self) -> Vec<String> {
        self.install_calls.lock().unwrap().clone()
    }

    pub fn uninstall_calls(&self) -> Vec<String> {
        self.uninstall_calls.lock().unwrap().clone()
    }

    pub fn version_of(&self, identifier: &str) -> Option<Version> {
        self.installed
            .lock()
            .unwrap()
            .iter()
            .find(|ext| ext.record.identifier == identifier)
            .and_then(|ext| ext.record.version.clone())
    }
}

#[async_trait]
impl HostInventory for FakeHost {
    fn installed(&self) -> anyhow::Result<Vec<InstalledExtension>> {
        Ok(self.installed.lock().unwrap().clone())
    }

    fn uninstall(&self, identifier: &str) -> anyhow::Result<()> {
        self.uninstall_calls.lock().unwrap().push(identifier.to_string());
        if self.fail_uninstall.lock().unwrap().contains(identifier) {
            anyhow::bail!("{} is locked by the host", identifier);
        }
        self.installed
            .lock()
            .unwrap()
            .retain(|ext| ext.record.identifier != identifier);
        Ok(())
    }

    async fn install(&self, package: &DownloadedPackage) -> anyhow::Result<ExtensionRecord> {
        let identifier = package.entry.identifier.clone();
        self.install_calls.lock().unwrap().push(identifier.clone());
        if self.fail_install.lock().unwrap().contains(&identifier) {
            anyhow::bail!("package for {} is corrupt", identifier);
        }

        let mut record = ExtensionRecord::new(package.entry.name.clone(), identifier.clone())
            .with_installed_at(chrono::Utc::now());
        record.version = package.entry.version.clone();

        let mut installed = self.installed.lock().unwrap();
        installed.retain(|ext| ext.record.identifier != identifier);
        installed.push(InstalledExtension::user(record.clone()));
        Ok(record)
    }
}

/// In-memory remote gallery; search matches names exactly
#[derive(Default)]
pub struct FakeGallery {
    entries: Mutex<Vec<GalleryEntry>>,
    fail_search: Mutex<HashSet<String>>,
    fail_download: Mutex<HashSet<String>>,
    download_calls: Mutex<usize>,
}

impl FakeGallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(name: &str, identifier: &str, version: &str) -> GalleryEntry {
        GalleryEntry {
            name: name.to_string(),
            identifier: identifier.to_string(),
            version: parse_version(version),
            download_url: format!("http://gallery.test/packages/{}.zip", identifier),
        }
    }

    pub fn publish(&self, entry: GalleryEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn fail_search_for(&self, text: &str) {
        self.fail_search.lock().unwrap().insert(text.to_string());
    }

    pub fn fail_download_for(&self, identifier: &str) {
        self.fail_download.lock().unwrap().insert(identifier.to_string());
    }

    pub fn download_calls(&self) -> usize {
        *self.download_calls.lock().unwrap()
    }
}

#[async_trait]
impl Gallery for FakeGallery {
    async fn search(&self, text: &str) -> anyhow::Result<Vec<GalleryEntry>> {
        if self.fail_search.lock().unwrap().contains(text) {
            anyhow::bail!("gallery unreachable");
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.name == text)
            .cloned()
            .collect())
    }

    async fn download(&self, entry: &GalleryEntry) -> anyhow::Result<DownloadedPackage> {
        *self.download_calls.lock().unwrap() += 1;
        if self.fail_download.lock().unwrap().contains(&entry.identifier) {
            anyhow::bail!("connection reset while downloading {}", entry.identifier);
        }
        Ok(DownloadedPackage {
            entry: entry.clone(),
            path: std::env::temp_dir().join(format!("{}-{}.zip", uuid::Uuid::new_v4(), entry.identifier)),
        })
    }
}

/// Inventory that records what the engine asks for; completions are
/// published manually with [`FakeInventory::publish`]
pub struct FakeInventory {
    installed: Mutex<Vec<ExtensionRecord>>,
    fail_uninstall: Mutex<HashSet<String>>,
    batches: Mutex<Vec<Vec<InstallContext>>>,
    uninstalled: Mutex<Vec<String>>,
    completions: Mutex<Option<mpsc::UnboundedSender<InstallEvent>>>,
}

impl FakeInventory {
    pub fn with_installed(installed: Vec<ExtensionRecord>) -> Self {
        Self {
            installed: Mutex::new(installed),
            fail_uninstall: Mutex::new(HashSet::new()),
            batches: Mutex::new(Vec::new()),
            uninstalled: Mutex::new(Vec::new()),
            completions: Mutex::new(None),
        }
    }

    pub fn fail_uninstall_for(&self, identifier: &str) {
        self.fail_uninstall.lock().unwrap().insert(identifier.to_string());
    }

    pub fn batches(&self) -> Vec<Vec<InstallContext>> {
        self.batches.lock().unwrap().clone()
    }

    /// Identifiers of every scheduled item, in scheduling order
    pub fn scheduled_identifiers(&self) -> Vec<String> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|context| context.record.identifier.clone())
            .collect()
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.uninstalled.lock().unwrap().clone()
    }

    /// Send a completion on the most recent batch's channel
    pub fn publish(&self, event: InstallEvent) {
        if let Some(completions) = self.completions.lock().unwrap().as_ref() {
            let _ = completions.send(event);
        }
    }
}

impl ExtensionInventory for FakeInventory {
    fn list_installed(&self) -> anyhow::Result<Vec<ExtensionRecord>> {
        Ok(self.installed.lock().unwrap().clone())
    }

    fn begin_install_batch(&self, items: Vec<InstallContext>, completions: mpsc::UnboundedSender<InstallEvent>) {
        self.batches.lock().unwrap().push(items);
        *self.completions.lock().unwrap() = Some(completions);
    }

    fn uninstall(&self, record: &ExtensionRecord) -> anyhow::Result<bool> {
        if self.fail_uninstall.lock().unwrap().contains(&record.identifier) {
            anyhow::bail!("{} is in use", record.identifier);
        }
        let mut installed = self.installed.lock().unwrap();
        let before = installed.len();
        installed.retain(|r| r.identifier != record.identifier);
        if installed.len() == before {
            return Ok(false);
        }
        self.uninstalled.lock().unwrap().push(record.identifier.clone());
        Ok(true)
    }
}
