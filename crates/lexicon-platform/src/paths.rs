use std::path::PathBuf;
use thiserror::Error;

const APP_DIR_NAME: &str = "lexicon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine cache directory")]
    CacheDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Build application paths for the current platform.
    ///
    /// # Errors
    /// Returns an error when a required base directory (for example the user
    /// home/config/cache/data directory) cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().ok_or(AppPathsError::HomeDirUnavailable)?;
            Ok(Self {
                config_dir: home.join("Library/Application Support").join(APP_DIR_NAME),
                cache_dir: home.join("Library/Caches").join(APP_DIR_NAME),
                data_dir: home.join("Library/Application Support").join(APP_DIR_NAME),
            })
        }

        #[cfg(not(target_os = "macos"))]
        {
            Ok(Self {
                config_dir: dirs::config_dir()
                    .ok_or(AppPathsError::ConfigDirUnavailable)?
                    .join(APP_DIR_NAME),
                cache_dir: dirs::cache_dir()
                    .ok_or(AppPathsError::CacheDirUnavailable)?
                    .join(APP_DIR_NAME),
                data_dir: dirs::data_local_dir()
                    .ok_or(AppPathsError::DataDirUnavailable)?
                    .join(APP_DIR_NAME),
            })
        }
    }

    /// Paths rooted under an arbitrary directory, used by tests and portable
    /// installs.
    #[must_use]
    pub fn under(root: &std::path::Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    /// Directory holding in-progress downloads and extracted update payloads.
    #[must_use]
    pub fn update_staging_dir(&self) -> PathBuf {
        self.cache_dir.join("updates")
    }

    /// Ensure all application directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.update_staging_dir())?;
        Ok(())
    }
}

/// Resolve the path of the running executable.
///
/// On Linux, once the binary has been replaced on disk `/proc/self/exe`
/// points at the old, unlinked inode and the reported path carries a
/// ` (deleted)` suffix; the suffix is stripped so callers get the path the
/// new binary now lives at.
///
/// # Errors
/// Returns an error if the executable path cannot be determined.
pub fn current_executable() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(strip_deleted_suffix(exe))
}

fn strip_deleted_suffix(exe: PathBuf) -> PathBuf {
    let path_str = exe.to_string_lossy();
    if let Some(trimmed) = path_str.strip_suffix(" (deleted)") {
        log::info!("Adjusted exe path from deleted inode: {trimmed}");
        PathBuf::from(trimmed)
    } else {
        exe
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{AppPaths, strip_deleted_suffix};

    #[test]
    fn file_paths_use_expected_filenames() {
        let paths = AppPaths::under(Path::new("/tmp/lexicon-root"));

        assert!(
            paths
                .settings_file()
                .ends_with(Path::new("config").join("settings.json"))
        );
        assert!(
            paths
                .log_file()
                .ends_with(Path::new("data").join("debug.log"))
        );
        assert!(
            paths
                .update_staging_dir()
                .ends_with(Path::new("cache").join("updates"))
        );
    }

    #[test]
    fn ensure_dirs_creates_all_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let paths = AppPaths::under(temp.path());

        paths
            .ensure_dirs()
            .expect("ensure_dirs should create application directories");

        assert!(paths.config_dir.is_dir());
        assert!(paths.cache_dir.is_dir());
        assert!(paths.data_dir.is_dir());
        assert!(paths.update_staging_dir().is_dir());
    }

    #[test]
    fn deleted_suffix_is_stripped() {
        let fixed = strip_deleted_suffix(PathBuf::from("/opt/lexicon/lexicon (deleted)"));
        assert_eq!(fixed, PathBuf::from("/opt/lexicon/lexicon"));

        let untouched = strip_deleted_suffix(PathBuf::from("/opt/lexicon/lexicon"));
        assert_eq!(untouched, PathBuf::from("/opt/lexicon/lexicon"));
    }
}
