// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    Create(PathBuf),
    Remove(PathBuf),
    Modify(PathBuf),
}

impl WatcherEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatcherEvent::Create(path) | WatcherEvent::Remove(path) | WatcherEvent::Modify(path) => path,
        }
    }
}

#[async_trait]
pub trait Watcher: Send + Sync {
    /// Start watching a single file and return a receiver for its events.
    /// The file itself may not exist yet; its parent directory must.
    async fn watch(&mut self, file: PathBuf) -> anyhow::Result<Receiver<WatcherEvent>>;

    /// Stop watching
    async fn stop(&mut self) -> anyhow::Result<()>;
}
