// SPDX-License-Identifier: GPL-3.0-only
pub mod path_sanitizer;

pub use path_sanitizer::{sanitize_identifier, validate_path_within_base};
