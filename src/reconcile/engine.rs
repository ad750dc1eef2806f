// SPDX-License-Identifier: GPL-3.0-only
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use crate::extension::DeclaredSet;
use crate::inventory::{BatchToken, ExtensionInventory, InstallContext, InstallEvent};
use crate::logging::ActivityLog;
use crate::reconcile::plan::plan;

/// Well-known name of this reconciler as it appears in the host inventory
pub const SELF_NAME: &str = "ExtensionSync";

/// How long a batch may wait for completions before detaching anyway
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub auto_update: bool,
    pub drain_timeout: Duration,
    pub self_name: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            auto_update: true,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            self_name: SELF_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Diffing,
    InstallingAndUninstalling,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetachReason {
    Drained,
    Watchdog,
    Superseded,
    Shutdown,
}

/// Snapshot of the engine for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: BatchPhase,
    pub batch: u64,
    pub pending: Vec<String>,
    pub attached: bool,
    pub detachments: u64,
}

/// What one `synchronize` call did synchronously
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub batch: u64,
    /// Nothing was attempted (empty declared set or unreadable inventory)
    pub skipped: bool,
    pub scheduled: Vec<String>,
    pub removed: Vec<String>,
    pub failed_removals: Vec<String>,
    pub protected: Vec<String>,
}

/// Listener and watchdog tasks of one batch; dropping aborts both
struct Subscription {
    listener: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listener.abort();
        self.watchdog.abort();
    }
}

/// State shared with completion callbacks, guarded by one lock
struct BatchTracker {
    batch: u64,
    phase: BatchPhase,
    pending: HashSet<String>,
    token: Option<BatchToken>,
    subscription: Option<Subscription>,
    detachments: u64,
}

impl BatchTracker {
    /// Take the subscription out exactly once; `None` if already detached
    fn detach(&mut self, reason: DetachReason) -> Option<Subscription> {
        let subscription = self.subscription.take()?;
        self.detachments += 1;
        if reason != DetachReason::Drained {
            self.pending.clear();
        }
        if self.phase == BatchPhase::Draining || reason != DetachReason::Drained {
            self.phase = BatchPhase::Idle;
        }
        debug!(batch = self.batch, ?reason, "Detached install listeners");
        Some(subscription)
    }
}

/// Reconciles the declared extension list with the installed inventory.
///
/// Additions are installed asynchronously through the inventory; removals
/// run synchronously. Completion events drain the pending set and the batch
/// detaches its listeners once it is empty or the watchdog fires.
pub struct ReconciliationEngine {
    inventory: Arc<dyn ExtensionInventory>,
    log: ActivityLog,
    auto_update: AtomicBool,
    drain_timeout: Duration,
    self_name: String,
    tracker: Mutex<BatchTracker>,
}

impl ReconciliationEngine {
    pub fn new(inventory: Arc<dyn ExtensionInventory>, log: ActivityLog, options: EngineOptions) -> Self {
        Self {
            inventory,
            log,
            auto_update: AtomicBool::new(options.auto_update),
            drain_timeout: options.drain_timeout,
            self_name: options.self_name,
            tracker: Mutex::new(BatchTracker {
                batch: 0,
                phase: BatchPhase::Idle,
                pending: HashSet::new(),
                token: None,
                subscription: None,
                detachments: 0,
            }),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, BatchTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_auto_update(&self, enabled: bool) {
        self.auto_update.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        let tracker = self.tracker();
        let mut pending: Vec<String> = tracker.pending.iter().cloned().collect();
        pending.sort();
        EngineStatus {
            phase: tracker.phase,
            batch: tracker.batch,
            pending,
            attached: tracker.subscription.is_some(),
            detachments: tracker.detachments,
        }
    }

    /// Run one reconciliation pass. Must be called from within a tokio runtime.
    ///
    /// `settings_updated_at` is the last-modified time of the settings file and
    /// bounds the grace window for removals.
    pub fn synchronize(
        self: &Arc<Self>,
        declared: &DeclaredSet,
        settings_updated_at: Option<DateTime<Utc>>,
    ) -> SyncSummary {
        let (batch, superseded) = {
            let mut tracker = self.tracker();
            if let Some(previous) = tracker.token.take() {
                previous.supersede();
            }
            let superseded = tracker.detach(DetachReason::Superseded);
            tracker.pending.clear();
            tracker.batch += 1;
            tracker.phase = BatchPhase::Diffing;
            (tracker.batch, superseded)
        };
        drop(superseded);

        let mut summary = SyncSummary {
            batch,
            ..SyncSummary::default()
        };

        if declared.is_empty() {
            self.log.emit("No declared extensions found; skipping synchronization");
            self.finish_without_work(batch);
            summary.skipped = true;
            return summary;
        }

        let installed = match self.inventory.list_installed() {
            Ok(installed) => installed,
            Err(e) => {
                self.log.emit(format!("Error while listing installed extensions: {:#}", e));
                self.finish_without_work(batch);
                summary.skipped = true;
                return summary;
            }
        };

        let plan = plan(declared, &installed, settings_updated_at, &self.self_name);
        info!(
            batch,
            install = plan.to_install.len(),
            update_candidates = plan.to_update.len(),
            remove = plan.to_remove.len(),
            "Computed synchronization plan"
        );
        if plan.is_empty() {
            debug!(batch, "Nothing to install or remove");
        }

        for record in &plan.protected {
            self.log.emit(format!(
                "Skipping uninstall of {}: installed after the last settings update",
                record.label()
            ));
            summary.protected.push(record.identifier.clone());
        }
        for record in &plan.self_protected {
            self.log.emit(format!("Not uninstalling {}: it is this extension", record.label()));
        }

        let token = BatchToken::new(batch);
        let auto_update = self.auto_update();
        let mut items: Vec<InstallContext> = plan
            .to_install
            .iter()
            .map(|record| InstallContext::install(token.clone(), record.clone(), auto_update))
            .collect();
        if auto_update {
            items.extend(plan.to_update.iter().map(|(declared, installed)| {
                InstallContext::update(token.clone(), declared.clone(), installed.clone())
            }));
        }

        let completions = {
            let mut tracker = self.tracker();
            if tracker.batch != batch {
                // A newer pass started while this one was diffing
                token.supersede();
                summary.skipped = true;
                return summary;
            }
            tracker.phase = BatchPhase::InstallingAndUninstalling;
            tracker.token = Some(token.clone());
            tracker.pending = items.iter().map(|i| i.record.identifier.clone()).collect();
            if items.is_empty() {
                None
            } else {
                let (completions, events) = mpsc::unbounded_channel();
                tracker.subscription = Some(self.attach(batch, events));
                Some(completions)
            }
        };

        if let Some(completions) = completions {
            for item in &items {
                if item.installed.is_none() {
                    self.log.emit(format!("Installing {}", item.record.label()));
                }
                summary.scheduled.push(item.record.identifier.clone());
            }
            self.inventory.begin_install_batch(items, completions);
        }

        for record in &plan.to_remove {
            match self.inventory.uninstall(record) {
                Ok(true) => summary.removed.push(record.identifier.clone()),
                Ok(false) => debug!(identifier = %record.identifier, "Already uninstalled"),
                Err(e) => {
                    self.log.emit(format!(
                        "Error while uninstalling {}: {:#}",
                        record.label(),
                        e
                    ));
                    summary.failed_removals.push(record.identifier.clone());
                }
            }
        }

        {
            let mut tracker = self.tracker();
            if tracker.batch == batch && tracker.phase == BatchPhase::InstallingAndUninstalling {
                tracker.phase = if tracker.subscription.is_some() {
                    BatchPhase::Draining
                } else {
                    BatchPhase::Idle
                };
            }
        }

        summary
    }

    fn finish_without_work(&self, batch: u64) {
        let mut tracker = self.tracker();
        if tracker.batch == batch {
            tracker.phase = BatchPhase::Idle;
        }
    }

    /// Spawn the listener forwarding completions and the watchdog deadline.
    ///
    /// `events` is unbounded and private to the batch, so no completion is
    /// ever dropped before it reaches `handle_event`.
    fn attach(self: &Arc<Self>, batch: u64, mut events: mpsc::UnboundedReceiver<InstallEvent>) -> Subscription {
        let engine: Weak<Self> = Arc::downgrade(self);
        let listener = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.handle_event(event);
            }
            debug!(batch, "Install completion channel closed");
        });

        let engine: Weak<Self> = Arc::downgrade(self);
        let timeout = self.drain_timeout;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(engine) = engine.upgrade() {
                engine.expire(batch);
            }
        });

        Subscription { listener, watchdog }
    }

    /// Record a terminal completion. Returns `false` for events that belong to
    /// another batch or to an item that is not pending.
    pub fn handle_event(&self, event: InstallEvent) -> bool {
        let detached = {
            let mut tracker = self.tracker();
            if event.batch != tracker.batch {
                debug!(batch = event.batch, identifier = %event.identifier, "Ignoring completion from superseded batch");
                return false;
            }
            if !tracker.pending.remove(&event.identifier) {
                debug!(identifier = %event.identifier, "Ignoring completion for item that is not pending");
                return false;
            }
            debug!(
                identifier = %event.identifier,
                outcome = %event.outcome,
                remaining = tracker.pending.len(),
                "Install item finished"
            );
            if tracker.pending.is_empty() {
                tracker.detach(DetachReason::Drained)
            } else {
                None
            }
        };

        if detached.is_some() {
            self.log.emit("All pending extension installs finished");
        }
        true
    }

    /// Watchdog path: detach `batch` regardless of outstanding items.
    /// Returns `false` if the batch is no longer current or already detached.
    pub fn expire(&self, batch: u64) -> bool {
        let (detached, abandoned) = {
            let mut tracker = self.tracker();
            if tracker.batch != batch {
                return false;
            }
            let abandoned = tracker.pending.len();
            (tracker.detach(DetachReason::Watchdog), abandoned)
        };

        match detached {
            Some(_) => {
                self.log.emit(format!(
                    "Timed out waiting for {} extension install(s); no longer tracking them",
                    abandoned
                ));
                true
            }
            None => false,
        }
    }

    /// Detach any active batch; in-flight pipelines are abandoned
    pub fn shutdown(&self) {
        let detached = {
            let mut tracker = self.tracker();
            if let Some(token) = tracker.token.take() {
                token.supersede();
            }
            tracker.detach(DetachReason::Shutdown)
        };
        if detached.is_some() {
            info!("Detached install listeners on shutdown");
        }
    }
}
