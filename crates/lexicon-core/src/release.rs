use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::UpdateError;
use crate::version::VersionIdentifier;

/// A published build as reported by a [`ReleaseSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    pub version: VersionIdentifier,
    pub download_url: String,
    pub notes: String,
    pub published_at: DateTime<Utc>,
    pub asset_name: Option<String>,
    /// Artifact size in bytes as published by the source.
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 of the artifact.
    pub sha256: Option<String>,
    pub release_page: Option<String>,
}

impl ReleaseDescriptor {
    /// File name to use for the downloaded artifact.
    #[must_use]
    pub fn file_name(&self) -> &str {
        if let Some(name) = self.asset_name.as_deref().filter(|name| is_safe_file_name(name)) {
            return name;
        }
        self.download_url
            .rsplit('/')
            .next()
            .filter(|name| is_safe_file_name(name))
            .unwrap_or("update-download")
    }
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains(['/', '\\'])
}

/// Where published builds are discovered.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Product identifier the source is keyed by.
    fn product(&self) -> &str;

    /// Latest published build for this platform, or `None` when nothing
    /// installable has been published.
    async fn latest_release(&self) -> Result<Option<ReleaseDescriptor>, UpdateError>;

    /// Every version the source still publishes.
    async fn published_versions(&self) -> Result<Vec<VersionIdentifier>, UpdateError>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::ReleaseDescriptor;
    use crate::version::VersionIdentifier;

    fn descriptor(url: &str, asset_name: Option<&str>) -> ReleaseDescriptor {
        ReleaseDescriptor {
            version: VersionIdentifier::new(1, 0, 1),
            download_url: url.to_string(),
            notes: String::new(),
            published_at: Utc::now(),
            asset_name: asset_name.map(ToString::to_string),
            size: None,
            sha256: None,
            release_page: None,
        }
    }

    #[test]
    fn file_name_prefers_asset_name() {
        let release = descriptor(
            "https://example.com/download/other.bin",
            Some("lexicon-1.0.1-linux-x64"),
        );
        assert_eq!(release.file_name(), "lexicon-1.0.1-linux-x64");
    }

    #[test]
    fn file_name_falls_back_to_url_then_default() {
        let release = descriptor("https://example.com/download/lexicon.exe", Some("../evil"));
        assert_eq!(release.file_name(), "lexicon.exe");

        let release = descriptor("https://example.com/download/", None);
        assert_eq!(release.file_name(), "update-download");
    }
}
