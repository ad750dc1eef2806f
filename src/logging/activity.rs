// SPDX-License-Identifier: GPL-3.0-only
use std::fmt;
use std::sync::Arc;

/// Single-argument message sink for reconciliation decisions.
///
/// Every decision (install started, update found, grace-window skip,
/// uninstall error, ...) is reported as exactly one human-readable line.
#[derive(Clone)]
pub struct ActivityLog {
    sink: Arc<dyn Fn(&str) + Send + Sync>,
}

impl ActivityLog {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self { sink: Arc::new(sink) }
    }

    /// Sink forwarding every line to the tracing subscriber
    pub fn tracing() -> Self {
        Self::new(|message| {
            tracing::info!(target: "extension_sync::activity", "{}", message);
        })
    }

    /// Sink that drops everything
    #[cfg(test)]
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, message: impl AsRef<str>) {
        (self.sink)(message.as_ref());
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityLog").finish_non_exhaustive()
    }
}
