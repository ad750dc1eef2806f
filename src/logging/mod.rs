// SPDX-License-Identifier: GPL-3.0-only
pub mod activity;
pub mod setup;

pub use activity::ActivityLog;
pub use setup::{setup_logging, FileLogging};
