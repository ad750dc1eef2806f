// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::extension::{
    parse_version, DownloadedPackage, ExtensionKind, ExtensionRecord, InstalledExtension,
};
use crate::host::extract::extract_package;
use crate::inventory::HostInventory;
use crate::utils::sanitize_identifier;

pub const MANIFEST_FILE_NAME: &str = "extension.json";

const STAGING_PREFIX: &str = ".staging-";

#[derive(thiserror::Error, Debug)]
pub enum HostError {
    #[error("extension {0} is not installed")]
    NotInstalled(String),

    #[error("package for {0} has no extension.json manifest")]
    MissingManifest(String),

    #[error("package identifier {found} does not match requested {expected}")]
    IdentifierMismatch { expected: String, found: String },

    #[error("extension {0} is managed by the host and cannot be removed")]
    Protected(String),
}

/// On-disk description of one installed extension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    #[serde(default)]
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub kind: ExtensionKind,
    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
}

impl ExtensionManifest {
    fn read(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn into_installed(self) -> InstalledExtension {
        let mut record = ExtensionRecord::new(self.name, self.identifier);
        record.version = self.version.as_deref().and_then(parse_version);
        record.installed_at = self.installed_at;
        InstalledExtension {
            record,
            kind: self.kind,
        }
    }
}

/// Host inventory over a directory of unpacked extensions, one
/// sub-directory per identifier
pub struct DirectoryHost {
    root: PathBuf,
}

impl DirectoryHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn extension_dir(&self, identifier: &str) -> anyhow::Result<PathBuf> {
        Ok(self.root.join(sanitize_identifier(identifier)?))
    }
}

#[async_trait]
impl HostInventory for DirectoryHost {
    fn installed(&self) -> anyhow::Result<Vec<InstalledExtension>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut installed = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with(STAGING_PREFIX) || !entry.file_type()?.is_dir() {
                continue;
            }

            let manifest_path = entry.path().join(MANIFEST_FILE_NAME);
            match ExtensionManifest::read(&manifest_path) {
                Ok(manifest) => installed.push(manifest.into_installed()),
                Err(e) => {
                    warn!(error = %e, path = %manifest_path.display(), "Skipping extension with unreadable manifest");
                }
            }
        }

        installed.sort_by(|a, b| a.record.name.cmp(&b.record.name));
        Ok(installed)
    }

    fn uninstall(&self, identifier: &str) -> anyhow::Result<()> {
        let dir = self.extension_dir(identifier)?;
        let manifest = ExtensionManifest::read(&dir.join(MANIFEST_FILE_NAME))
            .map_err(|_| HostError::NotInstalled(identifier.to_string()))?;
        if manifest.kind != ExtensionKind::User {
            return Err(HostError::Protected(identifier.to_string()).into());
        }

        std::fs::remove_dir_all(&dir)?;
        info!(identifier = %identifier, "Removed extension directory");
        Ok(())
    }

    async fn install(&self, package: &DownloadedPackage) -> anyhow::Result<ExtensionRecord> {
        let expected = &package.entry.identifier;
        let target = self.extension_dir(expected)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        let result = self.stage(package, &staging).await;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                    debug!(error = %cleanup, path = %staging.display(), "Failed to clean up staging directory");
                }
                return Err(e);
            }
        };

        if tokio::fs::try_exists(&target).await? {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging, &target).await?;

        info!(identifier = %expected, path = %target.display(), "Extension installed");
        Ok(record)
    }
}

impl DirectoryHost {
    /// Unpack into `staging` and stamp the manifest
    async fn stage(&self, package: &DownloadedPackage, staging: &Path) -> anyhow::Result<ExtensionRecord> {
        let expected = &package.entry.identifier;
        extract_package(package.path.clone(), staging.to_path_buf()).await?;

        let manifest_path = staging.join(MANIFEST_FILE_NAME);
        if !manifest_path.exists() {
            return Err(HostError::MissingManifest(expected.clone()).into());
        }
        let mut manifest = ExtensionManifest::read(&manifest_path)?;
        if &manifest.identifier != expected {
            return Err(HostError::IdentifierMismatch {
                expected: expected.clone(),
                found: manifest.identifier,
            }
            .into());
        }

        if manifest.name.is_empty() {
            manifest.name = package.entry.name.clone();
        }
        if manifest.version.is_none() {
            manifest.version = package.entry.version.as_ref().map(|v| v.to_string());
        }
        manifest.kind = ExtensionKind::User;
        manifest.installed_at = Some(Utc::now());
        manifest.write(&manifest_path)?;

        Ok(manifest.into_installed().record)
    }
}
