// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use crate::watcher::traits::{Watcher, WatcherEvent};

/// Watches one file by watching its parent directory non-recursively.
///
/// Editors commonly replace a file instead of writing it in place, so the
/// directory is watched and events are filtered by file name.
pub struct NotifyWatcher {
    watcher: Option<RecommendedWatcher>,
    target: Option<PathBuf>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self {
            watcher: None,
            target: None,
        }
    }
}

#[async_trait]
impl Watcher for NotifyWatcher {
    async fn watch(&mut self, file: PathBuf) -> anyhow::Result<mpsc::Receiver<WatcherEvent>> {
        let dir = match file.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Err(anyhow::anyhow!("Directory does not exist: {}", dir.display()));
        }
        let file_name = file
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", file.display()))?;

        let (tx, rx) = mpsc::channel(64);
        let mut watcher = RecommendedWatcher::new(
            move |event| {
                Self::handle_static_event(&tx, &file_name, event);
            },
            Config::default(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        // Replacing an existing watch drops (and stops) the previous one
        self.watcher = Some(watcher);
        self.target = Some(file.clone());
        info!(path = %file.display(), "Started watching file");

        Ok(rx)
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            if let Some(target) = self.target.take() {
                info!(path = %target.display(), "Stopped watching file");
            }
        }
        Ok(())
    }
}

impl NotifyWatcher {
    fn handle_static_event(
        event_tx: &mpsc::Sender<WatcherEvent>,
        file_name: &OsString,
        event: notify::Result<notify::Event>,
    ) {
        match event {
            Ok(event) => {
                for event in translate(event, file_name) {
                    // A full channel already holds a pending notification
                    if let Err(mpsc::error::TrySendError::Closed(_)) = event_tx.try_send(event) {
                        warn!("Failed to send watcher event, receiver is closed");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Notify watcher error");
            }
        }
    }
}

/// Events of `event` that concern the watched file name
fn translate(event: notify::Event, file_name: &OsString) -> Vec<WatcherEvent> {
    event
        .paths
        .into_iter()
        .filter(|path| is_target(path, file_name))
        .filter_map(|path| match event.kind {
            EventKind::Create(_) => Some(WatcherEvent::Create(path)),
            EventKind::Remove(_) => Some(WatcherEvent::Remove(path)),
            EventKind::Modify(_) => Some(WatcherEvent::Modify(path)),
            _ => None,
        })
        .collect()
}

fn is_target(path: &Path, file_name: &OsString) -> bool {
    path.file_name().is_some_and(|name| name == file_name.as_os_str())
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new()
    }
}
