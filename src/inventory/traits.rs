// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use tokio::sync::mpsc;
use crate::extension::{DownloadedPackage, ExtensionRecord, GalleryEntry, InstalledExtension};
use crate::inventory::events::{InstallContext, InstallEvent};

/// The host's own add-on manager
#[async_trait]
pub trait HostInventory: Send + Sync {
    /// Every extension the host knows about, including system components
    fn installed(&self) -> anyhow::Result<Vec<InstalledExtension>>;

    /// Remove an installed extension by identifier
    fn uninstall(&self, identifier: &str) -> anyhow::Result<()>;

    /// Install a downloaded package and return the resulting record
    async fn install(&self, package: &DownloadedPackage) -> anyhow::Result<ExtensionRecord>;
}

/// The remote extension gallery
#[async_trait]
pub trait Gallery: Send + Sync {
    /// Free-text search; results may contain unrelated entries
    async fn search(&self, text: &str) -> anyhow::Result<Vec<GalleryEntry>>;

    /// Fetch the package behind a gallery entry
    async fn download(&self, entry: &GalleryEntry) -> anyhow::Result<DownloadedPackage>;
}

/// Narrow capability the reconciliation engine works against
pub trait ExtensionInventory: Send + Sync {
    /// User extensions currently installed, sorted by name
    fn list_installed(&self) -> anyhow::Result<Vec<ExtensionRecord>>;

    /// Start search -> download -> install for every item; returns immediately.
    /// Each item ends with exactly one [`InstallEvent`] sent on `completions`.
    fn begin_install_batch(&self, items: Vec<InstallContext>, completions: mpsc::UnboundedSender<InstallEvent>);

    /// Uninstall the live extension matching `record`.
    /// Returns `Ok(false)` when nothing matching is installed.
    fn uninstall(&self, record: &ExtensionRecord) -> anyhow::Result<bool>;
}
