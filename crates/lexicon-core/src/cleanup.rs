use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::UpdateError;
use crate::install::{FileSystem, InstallLayout};
use crate::lock::StagingLock;
use crate::transfer::DOWNLOAD_PREFIX;
use crate::verify::EXTRACT_PREFIX;

/// What a startup cleanup pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// The install path was missing and the backup was moved back into it.
    pub restored_backup: bool,
    pub removed: Vec<PathBuf>,
    /// Another process holds the staging lock, so its files were left alone.
    pub staging_in_use: bool,
}

/// Repair and tidy whatever an interrupted update left behind.
///
/// Nothing is touched while another process holds the staging lock: its
/// session owns the install slots as well as the staging directory.
///
/// # Errors
/// Returns an error only when a missing installation could not be restored
/// from its backup. Failures to delete leftovers are logged and skipped.
pub fn cleanup_stale_artifacts(
    fs: &dyn FileSystem,
    layout: &InstallLayout,
    staging_dir: &Path,
) -> Result<CleanupReport, UpdateError> {
    let mut report = CleanupReport::default();

    let lock = match StagingLock::acquire(staging_dir) {
        Ok(lock) => Some(lock),
        Err(UpdateError::SessionActive) => {
            info!("Update in progress elsewhere, skipping cleanup");
            report.staging_in_use = true;
            return Ok(report);
        }
        Err(error) => {
            warn!("Cleaning up without the update lock: {error}");
            None
        }
    };

    if !fs.exists(&layout.install_path) && fs.exists(&layout.backup_path) {
        warn!(
            "Installation missing, restoring backup {}",
            layout.backup_path.display()
        );
        fs.rename(&layout.backup_path, &layout.install_path)
            .map_err(|error| {
                UpdateError::io_with_path(
                    "failed to restore backup",
                    &layout.backup_path,
                    &error,
                )
            })?;
        report.restored_backup = true;
    }

    for leftover in [&layout.backup_path, &layout.staged_path] {
        if !fs.exists(leftover) {
            continue;
        }
        match fs.remove_file(leftover) {
            Ok(()) => report.removed.push(leftover.clone()),
            Err(error) => warn!("Failed to remove {}: {error}", leftover.display()),
        }
    }

    if lock.is_some() {
        clean_staging_dir(staging_dir, &mut report);
    }

    if !report.removed.is_empty() {
        info!("Removed {} stale update file(s)", report.removed.len());
    }
    Ok(report)
}

fn clean_staging_dir(staging_dir: &Path, report: &mut CleanupReport) {
    let Ok(entries) = std::fs::read_dir(staging_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if StagingLock::is_lock_file(&name) {
            continue;
        }

        let path = entry.path();
        let result = if name.starts_with(DOWNLOAD_PREFIX) {
            std::fs::remove_file(&path)
        } else if name.starts_with(EXTRACT_PREFIX) {
            std::fs::remove_dir_all(&path)
        } else {
            continue;
        };

        match result {
            Ok(()) => {
                debug!("Removed stale staging entry {}", path.display());
                report.removed.push(path);
            }
            Err(error) => warn!("Failed to remove {}: {error}", path.display()),
        }
    }
}
