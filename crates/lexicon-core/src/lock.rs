use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::UpdateError;

const LOCK_FILE_NAME: &str = "update.lock";

/// Exclusive claim on the update staging directory, released on drop.
#[derive(Debug)]
pub struct StagingLock {
    _file: File,
    path: PathBuf,
}

impl StagingLock {
    /// Take the staging lock without waiting.
    ///
    /// # Errors
    /// Returns [`UpdateError::SessionActive`] when another process holds the
    /// lock, and I/O errors when the lock file cannot be opened or written.
    pub fn acquire(staging_dir: &Path) -> Result<Self, UpdateError> {
        std::fs::create_dir_all(staging_dir).map_err(|error| {
            UpdateError::io_with_path("failed to create staging directory", staging_dir, &error)
        })?;
        let path = staging_dir.join(LOCK_FILE_NAME);
        let mut lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|error| UpdateError::io_with_path("failed to open update lock", &path, &error))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error)
                if error.kind() == std::io::ErrorKind::WouldBlock
                    || error.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                return Err(UpdateError::SessionActive);
            }
            Err(error) => {
                return Err(UpdateError::io_with_path(
                    "failed to acquire update lock",
                    &path,
                    &error,
                ));
            }
        }

        lock_file
            .set_len(0)
            .and_then(|()| lock_file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(lock_file, "{}", std::process::id()))
            .map_err(|error| UpdateError::io("failed to write update lock metadata", error))?;

        Ok(Self {
            _file: lock_file,
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_lock_file(name: &str) -> bool {
        name == LOCK_FILE_NAME
    }
}
