// SPDX-License-Identifier: GPL-3.0-only
pub mod client;
pub mod http;

pub use http::{GalleryError, HttpGallery};
