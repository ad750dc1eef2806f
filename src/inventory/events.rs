// SPDX-License-Identifier: GPL-3.0-only
use semver::Version;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::extension::ExtensionRecord;

/// Generation marker shared by every item of one batch.
///
/// Starting a new batch supersedes the previous token; pipelines still in
/// flight check it before downloading and before installing.
#[derive(Debug, Clone)]
pub struct BatchToken {
    id: u64,
    superseded: Arc<AtomicBool>,
}

impl BatchToken {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            superseded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn supersede(&self) {
        self.superseded.store(true, Ordering::SeqCst);
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::SeqCst)
    }
}

/// Per-item context carried through search -> download -> install
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub batch: BatchToken,

    /// The declared record; `name` is the search text
    pub record: ExtensionRecord,

    /// Installed copy at diff time, present for update checks
    pub installed: Option<ExtensionRecord>,

    /// Whether an older installed copy may be replaced
    pub allow_update: bool,
}

impl InstallContext {
    pub fn install(batch: BatchToken, record: ExtensionRecord, allow_update: bool) -> Self {
        Self {
            batch,
            record,
            installed: None,
            allow_update,
        }
    }

    pub fn update(batch: BatchToken, record: ExtensionRecord, installed: ExtensionRecord) -> Self {
        Self {
            batch,
            record,
            installed: Some(installed),
            allow_update: true,
        }
    }
}

/// Terminal result of one item's pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed { version: Option<Version> },
    Updated { from: Option<Version>, to: Option<Version> },
    AlreadyInstalled,
    NewerInstalled { installed: Version, offered: Version },
    NotFound,
    Ambiguous { matches: usize },
    SearchFailed { error: String },
    DownloadFailed { error: String },
    InstallFailed { error: String },
    /// The batch was superseded before the item finished
    Abandoned,
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallOutcome::Installed { .. } => write!(f, "installed"),
            InstallOutcome::Updated { .. } => write!(f, "updated"),
            InstallOutcome::AlreadyInstalled => write!(f, "already installed"),
            InstallOutcome::NewerInstalled { .. } => write!(f, "newer version installed"),
            InstallOutcome::NotFound => write!(f, "not found"),
            InstallOutcome::Ambiguous { .. } => write!(f, "ambiguous"),
            InstallOutcome::SearchFailed { .. } => write!(f, "search failed"),
            InstallOutcome::DownloadFailed { .. } => write!(f, "download failed"),
            InstallOutcome::InstallFailed { .. } => write!(f, "install failed"),
            InstallOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Completion notification published once per item
#[derive(Debug, Clone, Serialize)]
pub struct InstallEvent {
    pub batch: u64,
    pub identifier: String,
    pub name: String,
    pub outcome: InstallOutcome,
}

impl InstallEvent {
    pub fn new(context: &InstallContext, outcome: InstallOutcome) -> Self {
        Self {
            batch: context.batch.id(),
            identifier: context.record.identifier.clone(),
            name: context.record.name.clone(),
            outcome,
        }
    }
}
