// SPDX-License-Identifier: GPL-3.0-only
pub mod engine;
pub mod plan;

pub use engine::{EngineOptions, EngineStatus, ReconciliationEngine, SyncSummary};
