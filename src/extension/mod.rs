// SPDX-License-Identifier: GPL-3.0-only
pub mod models;

pub use models::{
    DeclaredSet, DownloadedPackage, ExtensionKind, ExtensionRecord, GalleryEntry,
    InstalledExtension, parse_version,
};
