// SPDX-License-Identifier: GPL-3.0-only
pub mod notify_watcher;
pub mod traits;

pub use notify_watcher::NotifyWatcher;
pub use traits::{Watcher, WatcherEvent};
