use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::UpdateError;

const SINGLE_ATTEMPT: [Duration; 1] = [Duration::ZERO];

/// File operations used while swapping executables.
pub trait FileSystem: Send + Sync {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn make_executable(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::copy(from, to)?;
        std::fs::OpenOptions::new().write(true).open(to)?.sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    #[cfg(unix)]
    fn make_executable(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
    }

    #[cfg(not(unix))]
    fn make_executable(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// On-disk slots used by an install: the executable itself, the staged copy
/// of the new build next to it, and the backup slot the old build is moved
/// into while the swap happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub install_path: PathBuf,
    pub staged_path: PathBuf,
    pub backup_path: PathBuf,
}

impl InstallLayout {
    #[must_use]
    pub fn for_executable(install_path: impl Into<PathBuf>) -> Self {
        let install_path = install_path.into();
        Self {
            staged_path: with_suffix(&install_path, ".new"),
            backup_path: with_suffix(&install_path, ".old"),
            install_path,
        }
    }

    #[must_use]
    pub fn executable_name(&self) -> Option<&str> {
        self.install_path.file_name().and_then(|name| name.to_str())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    /// `false` when the old build could not be deleted (for example because
    /// it is the running image); startup cleanup removes it later.
    pub backup_removed: bool,
}

pub struct Installer<'a> {
    fs: &'a dyn FileSystem,
    layout: &'a InstallLayout,
    lock_retry_delays: &'a [Duration],
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(
        fs: &'a dyn FileSystem,
        layout: &'a InstallLayout,
        lock_retry_delays: &'a [Duration],
    ) -> Self {
        let lock_retry_delays = if lock_retry_delays.is_empty() {
            &SINGLE_ATTEMPT
        } else {
            lock_retry_delays
        };
        Self {
            fs,
            layout,
            lock_retry_delays,
        }
    }

    /// Replace the installed executable with `executable`.
    ///
    /// `begin_commit` runs right before the installed executable is moved
    /// aside; returning an error there aborts with the installation
    /// untouched. Past that point the swap runs to completion or rolls back.
    ///
    /// # Errors
    /// Returns [`UpdateError::InstallationLocked`] when a rename keeps
    /// failing on a lock, and I/O errors for other filesystem failures. In
    /// every error case the original executable is left at the install path.
    pub async fn install(
        &self,
        executable: &Path,
        begin_commit: impl FnOnce() -> Result<(), UpdateError>,
    ) -> Result<InstallReport, UpdateError> {
        let layout = self.layout;
        self.stage(executable)?;

        if self.fs.exists(&layout.backup_path)
            && let Err(error) = self.fs.remove_file(&layout.backup_path)
        {
            self.discard_staged();
            return Err(UpdateError::io_with_path(
                "failed to remove stale backup",
                &layout.backup_path,
                &error,
            ));
        }

        if let Err(error) = begin_commit() {
            self.discard_staged();
            return Err(error);
        }

        info!(
            "Replacing {} with {}",
            layout.install_path.display(),
            executable.display()
        );

        if let Err(error) = self
            .rename_with_retries(
                &layout.install_path,
                &layout.backup_path,
                "failed to move current executable aside",
            )
            .await
        {
            self.discard_staged();
            return Err(error);
        }

        if let Err(install_error) = self
            .rename_with_retries(
                &layout.staged_path,
                &layout.install_path,
                "failed to move update into place",
            )
            .await
        {
            warn!("Install failed, restoring backup: {install_error}");
            if let Err(restore_error) = self
                .rename_with_retries(
                    &layout.backup_path,
                    &layout.install_path,
                    "failed to restore previous executable",
                )
                .await
            {
                error!("Backup could not be restored: {restore_error}");
                return Err(restore_error);
            }
            self.discard_staged();
            return Err(install_error);
        }

        let backup_removed = match self.fs.remove_file(&layout.backup_path) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    "Leaving previous executable at {} for cleanup: {error}",
                    layout.backup_path.display()
                );
                false
            }
        };

        info!("Update installed at {}", layout.install_path.display());
        Ok(InstallReport { backup_removed })
    }

    fn stage(&self, executable: &Path) -> Result<(), UpdateError> {
        let staged = &self.layout.staged_path;
        if self.fs.exists(staged) {
            self.fs.remove_file(staged).map_err(|error| {
                UpdateError::io_with_path("failed to remove stale staged update", staged, &error)
            })?;
        }

        let result = self
            .fs
            .copy(executable, staged)
            .and_then(|()| self.fs.make_executable(staged));
        if let Err(error) = result {
            self.discard_staged();
            return Err(UpdateError::io_with_path(
                "failed to stage update",
                staged,
                &error,
            ));
        }
        debug!("Staged update at {}", staged.display());
        Ok(())
    }

    fn discard_staged(&self) {
        let staged = &self.layout.staged_path;
        if self.fs.exists(staged)
            && let Err(error) = self.fs.remove_file(staged)
        {
            warn!("Failed to remove staged update {}: {error}", staged.display());
        }
    }

    async fn rename_with_retries(
        &self,
        from: &Path,
        to: &Path,
        context: &'static str,
    ) -> Result<(), UpdateError> {
        let mut last_error = None;

        for (attempt, delay) in self.lock_retry_delays.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }

            match self.fs.rename(from, to) {
                Ok(()) => return Ok(()),
                Err(error) if is_lock_error(&error) => {
                    debug!("{context}: attempt {} hit a lock: {error}", attempt + 1);
                    last_error = Some(error);
                }
                Err(error) => return Err(UpdateError::io_with_path(context, from, &error)),
            }
        }

        Err(UpdateError::InstallationLocked {
            context,
            source: last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::PermissionDenied)),
        })
    }
}

/// Whether an I/O error means the file is transiently held by someone else
/// (an antivirus scan, the running image, an indexer).
pub(crate) fn is_lock_error(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    #[cfg(unix)]
    const LOCK_CODES: [i32; 2] = [16, 26];
    #[cfg(windows)]
    const LOCK_CODES: [i32; 2] = [32, 33];
    #[cfg(not(any(unix, windows)))]
    const LOCK_CODES: [i32; 0] = [];

    error
        .raw_os_error()
        .is_some_and(|code| LOCK_CODES.contains(&code))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{FileSystem, InstallLayout, Installer, StdFileSystem};
    use crate::error::{ErrorKind, UpdateError};

    /// Real filesystem that fails renames onto one target path.
    pub(crate) struct FaultyFileSystem {
        target: PathBuf,
        kind: io::ErrorKind,
        failures_left: Mutex<usize>,
    }

    impl FaultyFileSystem {
        pub(crate) fn failing_rename_to(target: &Path, kind: io::ErrorKind, times: usize) -> Self {
            Self {
                target: target.to_path_buf(),
                kind,
                failures_left: Mutex::new(times),
            }
        }
    }

    impl FileSystem for FaultyFileSystem {
        fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
            StdFileSystem.copy(from, to)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let mut left = self.failures_left.lock().expect("fault lock");
            if to == self.target && *left > 0 {
                *left -= 1;
                return Err(io::Error::new(self.kind, "injected rename failure"));
            }
            StdFileSystem.rename(from, to)
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            StdFileSystem.remove_file(path)
        }

        fn exists(&self, path: &Path) -> bool {
            StdFileSystem.exists(path)
        }

        fn make_executable(&self, path: &Path) -> io::Result<()> {
            StdFileSystem.make_executable(path)
        }
    }

    const NO_DELAYS: [Duration; 3] = [Duration::ZERO; 3];

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: InstallLayout,
        update: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let layout = InstallLayout::for_executable(dir.path().join("lexicon"));
        std::fs::write(&layout.install_path, b"old build").expect("install written");
        let update = dir.path().join("download.part");
        std::fs::write(&update, b"new build").expect("update written");
        Fixture {
            _dir: dir,
            layout,
            update,
        }
    }

    fn assert_original_intact(layout: &InstallLayout) {
        assert_eq!(
            std::fs::read(&layout.install_path).expect("install path readable"),
            b"old build"
        );
        assert!(!layout.backup_path.exists(), "backup slot should be empty");
        assert!(!layout.staged_path.exists(), "staged copy should be removed");
    }

    #[test]
    fn layout_slots_sit_next_to_the_executable() {
        let layout = InstallLayout::for_executable("/opt/lexicon/lexicon");
        assert_eq!(layout.staged_path, PathBuf::from("/opt/lexicon/lexicon.new"));
        assert_eq!(layout.backup_path, PathBuf::from("/opt/lexicon/lexicon.old"));
        assert_eq!(layout.executable_name(), Some("lexicon"));
    }

    #[tokio::test]
    async fn successful_install_swaps_and_removes_backup() {
        let fx = fixture();
        std::fs::write(&fx.layout.backup_path, b"stale").expect("stale backup written");

        let report = Installer::new(&StdFileSystem, &fx.layout, &NO_DELAYS)
            .install(&fx.update, || Ok(()))
            .await
            .expect("install should succeed");

        assert!(report.backup_removed);
        assert_eq!(
            std::fs::read(&fx.layout.install_path).expect("install path readable"),
            b"new build"
        );
        assert!(!fx.layout.backup_path.exists());
        assert!(!fx.layout.staged_path.exists());
    }

    #[tokio::test]
    async fn failure_after_rename_aside_restores_original() {
        let fx = fixture();
        let fs = FaultyFileSystem::failing_rename_to(
            &fx.layout.install_path,
            io::ErrorKind::Other,
            1,
        );

        let error = Installer::new(&fs, &fx.layout, &NO_DELAYS)
            .install(&fx.update, || Ok(()))
            .await
            .expect_err("move-in should fail");

        assert_eq!(error.kind(), ErrorKind::Io);
        assert_original_intact(&fx.layout);
    }

    #[tokio::test]
    async fn persistent_lock_on_move_in_surfaces_locked_and_restores() {
        let fx = fixture();
        // Every move-in attempt fails; the restore that follows succeeds.
        let fs = FaultyFileSystem::failing_rename_to(
            &fx.layout.install_path,
            io::ErrorKind::PermissionDenied,
            NO_DELAYS.len(),
        );

        let error = Installer::new(&fs, &fx.layout, &NO_DELAYS)
            .install(&fx.update, || Ok(()))
            .await
            .expect_err("move-in should stay locked");

        assert_eq!(error.kind(), ErrorKind::InstallationLocked);
        assert_original_intact(&fx.layout);
    }

    #[tokio::test]
    async fn transient_lock_on_rename_aside_is_retried() {
        let fx = fixture();
        let fs = FaultyFileSystem::failing_rename_to(
            &fx.layout.backup_path,
            io::ErrorKind::PermissionDenied,
            2,
        );

        Installer::new(&fs, &fx.layout, &NO_DELAYS)
            .install(&fx.update, || Ok(()))
            .await
            .expect("third attempt should succeed");

        assert_eq!(
            std::fs::read(&fx.layout.install_path).expect("install path readable"),
            b"new build"
        );
    }

    #[tokio::test]
    async fn locked_executable_is_left_in_place() {
        let fx = fixture();
        let fs = FaultyFileSystem::failing_rename_to(
            &fx.layout.backup_path,
            io::ErrorKind::PermissionDenied,
            usize::MAX,
        );

        let error = Installer::new(&fs, &fx.layout, &NO_DELAYS)
            .install(&fx.update, || Ok(()))
            .await
            .expect_err("rename aside should stay locked");

        assert_eq!(error.kind(), ErrorKind::InstallationLocked);
        assert_original_intact(&fx.layout);
    }

    #[tokio::test]
    async fn refused_commit_leaves_installation_untouched() {
        let fx = fixture();

        let error = Installer::new(&StdFileSystem, &fx.layout, &NO_DELAYS)
            .install(&fx.update, || Err(UpdateError::cancelled("install")))
            .await
            .expect_err("commit gate should abort");

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_original_intact(&fx.layout);
    }

    #[test]
    fn permission_denied_counts_as_lock() {
        assert!(super::is_lock_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(!super::is_lock_error(&io::Error::from(io::ErrorKind::NotFound)));
    }
}
