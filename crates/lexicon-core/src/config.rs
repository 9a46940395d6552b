use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_EXTRACTED_SIZE: u64 = 512 * 1024 * 1024;

/// Construction-time settings for an [`UpdateCoordinator`].
///
/// [`UpdateCoordinator`]: crate::UpdateCoordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Product identifier handed to the release source.
    pub product: String,
    /// Executable that gets replaced.
    pub install_path: PathBuf,
    /// Private directory for temporary downloads and the session lock.
    pub staging_dir: PathBuf,
    /// Upper bound for a single release query.
    pub request_timeout: Duration,
    /// Longest gap between two received chunks before a download is
    /// treated as interrupted.
    pub chunk_timeout: Duration,
    /// Delay before each attempt of a retryable check or download. The
    /// length is the attempt count.
    pub retry_delays: Vec<Duration>,
    /// Delay before each attempt of a rename that hit a file lock.
    pub lock_retry_delays: Vec<Duration>,
    /// Refuse releases that publish no checksum.
    pub require_checksum: bool,
    /// Largest executable accepted out of a zip package, in bytes.
    pub max_extracted_size: u64,
}

impl UpdaterConfig {
    #[must_use]
    pub fn new(
        product: impl Into<String>,
        install_path: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            product: product.into(),
            install_path: install_path.into(),
            staging_dir: staging_dir.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            retry_delays: default_retry_delays(),
            lock_retry_delays: default_lock_retry_delays(),
            require_checksum: false,
            max_extracted_size: DEFAULT_MAX_EXTRACTED_SIZE,
        }
    }
}

#[must_use]
pub fn default_retry_delays() -> Vec<Duration> {
    vec![
        Duration::ZERO,
        Duration::from_secs(2),
        Duration::from_secs(5),
    ]
}

#[must_use]
pub fn default_lock_retry_delays() -> Vec<Duration> {
    [0, 250, 500, 1000, 2000]
        .into_iter()
        .map(Duration::from_millis)
        .collect()
}
