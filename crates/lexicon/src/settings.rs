use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lexicon_core::UpdaterConfig;

pub const PRODUCT: &str = "lexicon";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub update: UpdateSettings,
}

/// Knobs handed to the update coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// `owner/repo` whose GitHub releases are checked.
    #[serde(default = "default_repo")]
    pub repo: String,

    #[serde(default)]
    pub check_trigger: CheckTrigger,

    #[serde(default)]
    pub include_prereleases: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default = "default_lock_retry_delays")]
    pub lock_retry_delays_ms: Vec<u64>,

    #[serde(default)]
    pub require_checksum: bool,

    /// Executable to replace. Defaults to the running executable.
    #[serde(default)]
    pub install_path: Option<PathBuf>,
}

/// When the app looks for updates on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckTrigger {
    #[default]
    OnLaunch,
    Manual,
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_repo() -> String {
    "pyapril15/Dictionary".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_chunk_timeout() -> u64 {
    30
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 2, 5]
}

fn default_lock_retry_delays() -> Vec<u64> {
    vec![0, 250, 500, 1000, 2000]
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            connect_timeout_secs: default_connect_timeout(),
            update: UpdateSettings::default(),
        }
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            check_trigger: CheckTrigger::OnLaunch,
            include_prereleases: false,
            request_timeout_secs: default_request_timeout(),
            chunk_timeout_secs: default_chunk_timeout(),
            retry_delays_secs: default_retry_delays(),
            lock_retry_delays_ms: default_lock_retry_delays(),
            require_checksum: false,
            install_path: None,
        }
    }
}

impl AppSettings {
    /// Read settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                log::warn!("Ignoring invalid settings file {}: {error}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl UpdateSettings {
    pub fn updater_config(&self, install_path: PathBuf, staging_dir: PathBuf) -> UpdaterConfig {
        let mut config = UpdaterConfig::new(PRODUCT, install_path, staging_dir);
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.chunk_timeout = Duration::from_secs(self.chunk_timeout_secs);
        config.retry_delays = self
            .retry_delays_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect();
        config.lock_retry_delays = self
            .lock_retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect();
        config.require_checksum = self.require_checksum;
        config
    }

    pub fn releases_page(&self) -> String {
        format!("https://github.com/{}/releases", self.repo)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use serde_json::json;

    use super::{AppSettings, CheckTrigger};

    #[test]
    fn defaults_match_documented_values() {
        let settings = AppSettings::default();

        assert!(!settings.debug_logging);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.update.repo, "pyapril15/Dictionary");
        assert_eq!(settings.update.check_trigger, CheckTrigger::OnLaunch);
        assert_eq!(settings.update.retry_delays_secs, vec![0, 2, 5]);
        assert_eq!(settings.update.lock_retry_delays_ms, vec![0, 250, 500, 1000, 2000]);
        assert!(!settings.update.require_checksum);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let value = json!({
            "debug_logging": true,
            "update": { "check_trigger": "manual", "require_checksum": true }
        });

        let settings: AppSettings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert!(settings.debug_logging);
        assert_eq!(settings.update.check_trigger, CheckTrigger::Manual);
        assert!(settings.update.require_checksum);
        assert_eq!(settings.update.request_timeout_secs, 30);
        assert_eq!(settings.update.repo, "pyapril15/Dictionary");
    }

    #[test]
    fn save_and_load_preserve_update_section() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("config").join("settings.json");
        let mut settings = AppSettings::default();
        settings.update.repo = "example/lexicon".to_string();
        settings.update.install_path = Some(PathBuf::from("/opt/lexicon/lexicon"));

        settings.save_to(&path).expect("settings should save");
        let loaded = AppSettings::load_from(&path);

        assert_eq!(loaded.update.repo, "example/lexicon");
        assert_eq!(
            loaded.update.install_path,
            Some(PathBuf::from("/opt/lexicon/lexicon"))
        );
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("settings.json");
        std::fs::write(&path, "{ not json").expect("file should be written");

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.update.check_trigger, CheckTrigger::OnLaunch);
    }

    #[test]
    fn updater_config_converts_units() {
        let mut settings = AppSettings::default();
        settings.update.retry_delays_secs = vec![0, 3];
        settings.update.lock_retry_delays_ms = vec![100];
        settings.update.require_checksum = true;

        let config = settings
            .update
            .updater_config(PathBuf::from("/opt/lexicon"), PathBuf::from("/tmp/updates"));

        assert_eq!(config.product, "lexicon");
        assert_eq!(config.retry_delays, vec![Duration::ZERO, Duration::from_secs(3)]);
        assert_eq!(config.lock_retry_delays, vec![Duration::from_millis(100)]);
        assert!(config.require_checksum);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
