// SPDX-License-Identifier: GPL-3.0-only
pub mod adapter;
pub mod events;
pub mod traits;
pub mod version;

pub use adapter::InventoryAdapter;
pub use events::{BatchToken, InstallContext, InstallEvent};
pub use traits::{ExtensionInventory, Gallery, HostInventory};
