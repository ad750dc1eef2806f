// SPDX-License-Identifier: GPL-3.0-only
use std::path::{Component, Path};
use anyhow::{Context, Result};

/// Turn an extension identifier into a directory name.
///
/// Keeps alphanumerics, dash, underscore and dot; everything else (including
/// path separators) becomes an underscore.
pub fn sanitize_identifier(identifier: &str) -> Result<String> {
    let sanitized: String = identifier
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        return Err(anyhow::anyhow!("Identifier cannot be empty after sanitization"));
    }

    if sanitized.len() > 255 {
        return Err(anyhow::anyhow!("Identifier too long (max 255 characters)"));
    }

    // Also rules out "." and ".."
    if sanitized.starts_with('.') {
        return Err(anyhow::anyhow!("Identifier cannot start with '.'"));
    }

    Ok(sanitized)
}

/// Validate that a path would be within a base directory when created
///
/// Works for paths that don't exist yet by rejecting absolute paths and
/// parent directory references. Existing paths are also checked after
/// canonicalization.
pub fn validate_path_within_base(path: &Path, base: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(anyhow::anyhow!(
                    "Path {} contains parent directory reference (..)",
                    path.display()
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow::anyhow!("Path {} must be relative", path.display()));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    let resolved = base.join(path);
    if resolved.exists() {
        let canonical_path = resolved.canonicalize().context("Failed to canonicalize path")?;
        let canonical_base = base.canonicalize().context("Failed to canonicalize base path")?;
        if !canonical_path.starts_with(&canonical_base) {
            return Err(anyhow::anyhow!(
                "Path {} is outside base directory {}",
                canonical_path.display(),
                canonical_base.display()
            ));
        }
    }

    Ok(())
}
