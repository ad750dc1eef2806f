// SPDX-License-Identifier: GPL-3.0-only
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;
use zip::ZipArchive;
use crate::utils::validate_path_within_base;

/// Extract a ZIP package into `dest`, returning the number of files written.
///
/// Entries whose names would escape `dest` are skipped.
pub async fn extract_package(archive_path: PathBuf, dest: PathBuf) -> anyhow::Result<usize> {
    info!(archive = %archive_path.display(), dest = %dest.display(), "Extracting extension package");

    tokio::fs::create_dir_all(&dest).await?;

    let archive_for_task = archive_path.clone();
    let dest_for_task = dest.clone();
    let written = tokio::task::spawn_blocking(move || extract_blocking(&archive_for_task, &dest_for_task))
        .await??;

    info!(archive = %archive_path.display(), files = written, "Package extraction completed");
    Ok(written)
}

fn extract_blocking(archive_path: &Path, dest: &Path) -> anyhow::Result<usize> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => continue,
        };
        validate_path_within_base(&relative, dest)?;
        let outpath = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
            written += 1;
        }
    }

    Ok(written)
}
