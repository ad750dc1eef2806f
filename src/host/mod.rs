// SPDX-License-Identifier: GPL-3.0-only
pub mod directory;
pub mod extract;

pub use directory::DirectoryHost;
