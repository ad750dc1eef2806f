// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use crate::extension::{DownloadedPackage, ExtensionRecord, GalleryEntry};
use crate::inventory::events::{InstallContext, InstallEvent, InstallOutcome};
use crate::inventory::traits::{ExtensionInventory, Gallery, HostInventory};
use crate::inventory::version::{decide, InstallDecision};
use crate::logging::ActivityLog;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MatchError {
    #[error("no gallery entry matches identifier {0}")]
    NotFound(String),

    #[error("{matches} gallery entries match identifier {identifier}")]
    Ambiguous { identifier: String, matches: usize },
}

/// Select the single gallery entry carrying the record's identifier
pub fn select_entry(
    record: &ExtensionRecord,
    results: Vec<GalleryEntry>,
) -> Result<GalleryEntry, MatchError> {
    let mut matches: Vec<GalleryEntry> = results
        .into_iter()
        .filter(|entry| entry.identifier == record.identifier)
        .collect();

    match matches.len() {
        0 => Err(MatchError::NotFound(record.identifier.clone())),
        1 => Ok(matches.remove(0)),
        n => Err(MatchError::Ambiguous {
            identifier: record.identifier.clone(),
            matches: n,
        }),
    }
}

/// Inventory backed by the host's add-on manager and the remote gallery.
///
/// Installs run as one tokio task per item; each task reports its outcome on
/// the completion sender handed in with the batch.
pub struct InventoryAdapter {
    pipeline: Pipeline,
}

#[derive(Clone)]
struct Pipeline {
    host: Arc<dyn HostInventory>,
    gallery: Arc<dyn Gallery>,
    log: ActivityLog,
}

impl InventoryAdapter {
    pub fn new(host: Arc<dyn HostInventory>, gallery: Arc<dyn Gallery>, log: ActivityLog) -> Self {
        Self {
            pipeline: Pipeline { host, gallery, log },
        }
    }
}

impl ExtensionInventory for InventoryAdapter {
    fn list_installed(&self) -> anyhow::Result<Vec<ExtensionRecord>> {
        self.pipeline.list_installed()
    }

    fn begin_install_batch(&self, items: Vec<InstallContext>, completions: mpsc::UnboundedSender<InstallEvent>) {
        info!(count = items.len(), "Starting install batch");

        for context in items {
            let pipeline = self.pipeline.clone();
            let completions = completions.clone();
            tokio::spawn(async move {
                let outcome = pipeline.run(&context).await;
                publish(&completions, InstallEvent::new(&context, outcome));
            });
        }
    }

    fn uninstall(&self, record: &ExtensionRecord) -> anyhow::Result<bool> {
        let installed = self.pipeline.list_installed()?;
        let Some(live) = installed.iter().find(|r| r.identifier == record.identifier) else {
            debug!(identifier = %record.identifier, "Nothing to uninstall");
            return Ok(false);
        };

        self.pipeline.log.emit(format!("Uninstalling {}", live.label()));
        self.pipeline.host.uninstall(&live.identifier)?;
        Ok(true)
    }
}

impl Pipeline {
    fn list_installed(&self) -> anyhow::Result<Vec<ExtensionRecord>> {
        let mut records: Vec<ExtensionRecord> = self
            .host
            .installed()?
            .into_iter()
            .filter(|ext| ext.is_user())
            .map(|ext| ext.record)
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.identifier.cmp(&b.identifier)));
        Ok(records)
    }

    async fn run(&self, context: &InstallContext) -> InstallOutcome {
        let record = &context.record;

        let results = match self.gallery.search(&record.name).await {
            Ok(results) => results,
            Err(e) => {
                self.log.emit(format!(
                    "Error while searching online for {}: {:#}",
                    record.label(),
                    e
                ));
                return InstallOutcome::SearchFailed { error: e.to_string() };
            }
        };

        let entry = match select_entry(record, results) {
            Ok(entry) => entry,
            Err(MatchError::NotFound(_)) => {
                self.log.emit(format!(
                    "Could not find {} in the online gallery",
                    record.label()
                ));
                return InstallOutcome::NotFound;
            }
            Err(MatchError::Ambiguous { matches, .. }) => {
                self.log.emit(format!(
                    "Could not find {} in the online gallery: {} entries share its identifier",
                    record.label(),
                    matches
                ));
                return InstallOutcome::Ambiguous { matches };
            }
        };

        // Avoid downloading something the diff-time snapshot already rules out
        if let InstallDecision::Skip(reason) =
            decide(context.installed.as_ref(), entry.version.as_ref(), context.allow_update)
        {
            self.log_skip(record, &reason.clone().into());
            return reason.into();
        }

        if context.batch.is_superseded() {
            debug!(identifier = %record.identifier, "Batch superseded before download");
            return InstallOutcome::Abandoned;
        }

        let package = match self.gallery.download(&entry).await {
            Ok(package) => package,
            Err(e) => {
                self.log.emit(format!(
                    "Error while downloading {}: {:#}",
                    record.label(),
                    e
                ));
                return InstallOutcome::DownloadFailed { error: e.to_string() };
            }
        };

        let outcome = self.install_downloaded(context, &package).await;
        discard_package(&package).await;
        outcome
    }

    async fn install_downloaded(
        &self,
        context: &InstallContext,
        package: &DownloadedPackage,
    ) -> InstallOutcome {
        let record = &context.record;

        // Installation state may have changed since the batch was scheduled
        let installed_now = match self.list_installed() {
            Ok(installed) => installed
                .into_iter()
                .find(|r| r.identifier == record.identifier),
            Err(e) => {
                self.log.emit(format!(
                    "Error while installing {}: could not list installed extensions: {:#}",
                    record.label(),
                    e
                ));
                return InstallOutcome::InstallFailed { error: e.to_string() };
            }
        };

        let offered = package.entry.version.clone();
        let replaced = match decide(installed_now.as_ref(), offered.as_ref(), context.allow_update) {
            InstallDecision::Skip(reason) => {
                let outcome = reason.into();
                self.log_skip(record, &outcome);
                return outcome;
            }
            InstallDecision::Install => None,
            InstallDecision::Update { from } => Some(from),
        };

        if context.batch.is_superseded() {
            debug!(identifier = %record.identifier, "Batch superseded before install");
            return InstallOutcome::Abandoned;
        }

        if let Some(from) = &replaced {
            self.log.emit(format!(
                "Update found for {}: {} -> {}",
                record.label(),
                display_version(from.as_ref()),
                display_version(offered.as_ref())
            ));
            // Explicit replacement: the grace window does not apply here
            if let Err(e) = self.host.uninstall(&record.identifier) {
                self.log.emit(format!(
                    "Error while uninstalling {} before update: {:#}",
                    record.label(),
                    e
                ));
                return InstallOutcome::InstallFailed { error: e.to_string() };
            }
        }

        match self.host.install(package).await {
            Ok(installed) => match replaced {
                Some(from) => {
                    self.log.emit(format!(
                        "Updated {} to {}",
                        installed.label(),
                        display_version(installed.version.as_ref())
                    ));
                    InstallOutcome::Updated {
                        from,
                        to: installed.version,
                    }
                }
                None => {
                    self.log.emit(format!("Installed {}", installed.label()));
                    InstallOutcome::Installed {
                        version: installed.version,
                    }
                }
            },
            Err(e) => {
                self.log.emit(format!(
                    "Error while installing {}: {:#}",
                    record.label(),
                    e
                ));
                InstallOutcome::InstallFailed { error: e.to_string() }
            }
        }
    }

    fn log_skip(&self, record: &ExtensionRecord, outcome: &InstallOutcome) {
        match outcome {
            InstallOutcome::NewerInstalled { installed, offered } => self.log.emit(format!(
                "Skipping {}: installed version {} is newer than gallery version {}",
                record.label(),
                installed,
                offered
            )),
            _ => self.log.emit(format!("{} is already up to date", record.label())),
        }
    }
}

fn publish(completions: &mpsc::UnboundedSender<InstallEvent>, event: InstallEvent) {
    debug!(identifier = %event.identifier, outcome = %event.outcome, "Install pipeline finished");
    if completions.send(event).is_err() {
        debug!("Batch no longer listening; completion dropped");
    }
}

async fn discard_package(package: &DownloadedPackage) {
    if let Err(e) = tokio::fs::remove_file(&package.path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, path = %package.path.display(), "Failed to clean up downloaded package");
        }
    }
}

fn display_version(version: Option<&semver::Version>) -> String {
    version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
