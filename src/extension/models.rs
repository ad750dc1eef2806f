// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Identity and version of one extension.
///
/// Only `name` and `identifier` are persisted. Identity is the `identifier`
/// alone; `name` is the key used to search the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRecord {
    /// Display name, also the gallery search text
    #[serde(default)]
    pub name: String,

    /// Stable package identifier
    #[serde(default)]
    pub identifier: String,

    /// Version if known (never persisted)
    #[serde(skip)]
    pub version: Option<Version>,

    /// When the host installed this extension (never persisted)
    #[serde(skip)]
    pub installed_at: Option<DateTime<Utc>>,
}

impl ExtensionRecord {
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            version: None,
            installed_at: None,
        }
    }

    #[cfg(test)]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    #[cfg(test)]
    pub fn with_installed_at(mut self, installed_at: DateTime<Utc>) -> Self {
        self.installed_at = Some(installed_at);
        self
    }

    /// A record without an identifier cannot be matched against anything
    pub fn is_valid(&self) -> bool {
        !self.identifier.trim().is_empty()
    }

    /// Label used in log lines
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.identifier
        } else {
            &self.name
        }
    }
}

impl PartialEq for ExtensionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for ExtensionRecord {}

impl Hash for ExtensionRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    #[default]
    User,
    /// Shipped with the host, never reconciled
    System,
    /// Owned by an external installer, never reconciled
    InstallerManaged,
}

/// An extension as reported by the host inventory
#[derive(Debug, Clone)]
pub struct InstalledExtension {
    pub record: ExtensionRecord,
    pub kind: ExtensionKind,
}

impl InstalledExtension {
    #[cfg(test)]
    pub fn user(record: ExtensionRecord) -> Self {
        Self {
            record,
            kind: ExtensionKind::User,
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind == ExtensionKind::User
    }
}

/// One search hit from the remote gallery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub name: String,
    pub identifier: String,
    #[serde(default, deserialize_with = "deserialize_version")]
    pub version: Option<Version>,
    pub download_url: String,
}

/// A gallery payload that has been downloaded and is ready to install
#[derive(Debug, Clone)]
pub struct DownloadedPackage {
    pub entry: GalleryEntry,
    pub path: PathBuf,
}

/// The user's intended extension list, deduplicated by identity
#[derive(Debug, Clone, Default)]
pub struct DeclaredSet {
    records: BTreeMap<String, ExtensionRecord>,
}

impl DeclaredSet {
    /// First occurrence of an identifier wins
    pub fn from_records(records: impl IntoIterator<Item = ExtensionRecord>) -> Self {
        let mut map = BTreeMap::new();
        for record in records {
            map.entry(record.identifier.clone()).or_insert(record);
        }
        Self { records: map }
    }

    pub fn contains(&self, record: &ExtensionRecord) -> bool {
        self.records.contains_key(&record.identifier)
    }

    #[cfg(test)]
    pub fn get(&self, identifier: &str) -> Option<&ExtensionRecord> {
        self.records.get(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    pub fn into_records(self) -> Vec<ExtensionRecord> {
        self.records.into_values().collect()
    }
}

/// Parse a version leniently: "2" and "2.1" are padded to three components
pub fn parse_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    let parts: Vec<&str> = raw.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
        *slot = part.parse().ok()?;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<Version>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_version))
}
