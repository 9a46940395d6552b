use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::UpdateError;
use crate::release::{ReleaseDescriptor, ReleaseSource};
use crate::version::VersionIdentifier;

const GITHUB_API_BASE: &str = "https://api.github.com";
const RELEASES_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub html_url: String,
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

/// Release source backed by the GitHub releases API of `owner/repo`.
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    product: String,
    repo: String,
    api_base: String,
    include_prereleases: bool,
}

impl GitHubReleaseSource {
    #[must_use]
    pub fn new(client: reqwest::Client, product: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client,
            product: product.into(),
            repo: repo.into(),
            api_base: GITHUB_API_BASE.to_string(),
            include_prereleases: false,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn include_prereleases(mut self, include: bool) -> Self {
        self.include_prereleases = include;
        self
    }

    async fn fetch_releases(&self) -> Result<Vec<GitHubRelease>, UpdateError> {
        let url = format!(
            "{}/repos/{}/releases?per_page={RELEASES_PER_PAGE}",
            self.api_base, self.repo
        );

        debug!("Fetching releases from {url}");
        let response = self
            .client
            .get(&url)
            .header("User-Agent", format!("{}/{}", self.product, env!("CARGO_PKG_VERSION")))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|error| UpdateError::network("release query", error))?;

        let status = response.status();
        if !status.is_success() {
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            let details = format!("HTTP {status}{body_snippet}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                UpdateError::network("release query", details)
            } else {
                UpdateError::malformed(format!("release query rejected: {details}"))
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| UpdateError::network("release query", error))?;
        parse_releases(&body)
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    fn product(&self) -> &str {
        &self.product
    }

    async fn latest_release(&self) -> Result<Option<ReleaseDescriptor>, UpdateError> {
        let releases = self.fetch_releases().await?;
        let Some(release) = releases
            .into_iter()
            .find(|release| !release.draft && (self.include_prereleases || !release.prerelease))
        else {
            warn!("No published release found for {}", self.repo);
            return Ok(None);
        };

        let descriptor = descriptor_from_release(&self.product, release)?;
        if let Some(descriptor) = &descriptor {
            info!("Latest published release: {}", descriptor.version);
        }
        Ok(descriptor)
    }

    async fn published_versions(&self) -> Result<Vec<VersionIdentifier>, UpdateError> {
        let releases = self.fetch_releases().await?;
        Ok(releases
            .iter()
            .filter(|release| !release.draft)
            .filter_map(|release| match VersionIdentifier::parse(&release.tag_name) {
                Ok(version) => Some(version),
                Err(error) => {
                    debug!("Skipping release with unparseable tag: {error}");
                    None
                }
            })
            .collect())
    }
}

/// Parse a GitHub releases listing.
///
/// # Errors
/// Returns [`UpdateError::MalformedRelease`] when the body is not a release
/// list.
pub fn parse_releases(body: &str) -> Result<Vec<GitHubRelease>, UpdateError> {
    serde_json::from_str(body)
        .map_err(|error| UpdateError::malformed(format!("unexpected release listing: {error}")))
}

/// Map a GitHub release to a descriptor for this platform.
///
/// Returns `Ok(None)` when the release carries no asset for this platform.
///
/// # Errors
/// Returns [`UpdateError::MalformedRelease`] when the tag is not a version or
/// the release lacks a publish date.
pub fn descriptor_from_release(
    product: &str,
    release: GitHubRelease,
) -> Result<Option<ReleaseDescriptor>, UpdateError> {
    let version = VersionIdentifier::parse(&release.tag_name)
        .map_err(|error| UpdateError::malformed(error.to_string()))?;
    let published_at = release.published_at.ok_or_else(|| {
        UpdateError::malformed(format!("release {} has no publish date", release.tag_name))
    })?;

    let Some(asset) = select_asset(product, &version, &release.assets) else {
        warn!("No downloadable asset for this platform in release {version}");
        return Ok(None);
    };

    Ok(Some(ReleaseDescriptor {
        version,
        download_url: asset.browser_download_url.clone(),
        notes: release.body.unwrap_or_default(),
        published_at,
        asset_name: Some(asset.name.clone()),
        size: Some(asset.size).filter(|size| *size > 0),
        sha256: asset.digest.as_deref().and_then(parse_sha256_digest),
        release_page: Some(release.html_url),
    }))
}

/// Stem of the package name published for this platform, for example
/// `lexicon-1.0.1-linux-x64`.
#[must_use]
pub fn platform_asset_stem(product: &str, version: &VersionIdentifier) -> Option<String> {
    let os = if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        return None;
    };
    let arch = if cfg!(target_arch = "x86_64") {
        "x64"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        return None;
    };
    Some(format!("{}-{version}-{os}-{arch}", product.to_ascii_lowercase()))
}

fn select_asset<'a>(
    product: &str,
    version: &VersionIdentifier,
    assets: &'a [GitHubAsset],
) -> Option<&'a GitHubAsset> {
    if let Some(stem) = platform_asset_stem(product, version) {
        let candidates = [stem.clone(), format!("{stem}.exe"), format!("{stem}.zip")];
        if let Some(asset) = assets
            .iter()
            .find(|asset| candidates.iter().any(|name| asset.name.eq_ignore_ascii_case(name)))
        {
            return Some(asset);
        }
    }

    if cfg!(target_os = "windows") {
        return assets
            .iter()
            .find(|asset| asset.name.to_ascii_lowercase().ends_with(".exe"));
    }

    None
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}
