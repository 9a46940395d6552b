use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}'")]
pub struct VersionParseError {
    pub input: String,
}

/// A parsed application version.
///
/// Equality and ordering follow semantic-version precedence:
/// `(major, minor, patch)` first, a pre-release sorts below its release.
/// Build metadata is kept for display but never compared, so `1.0.0+win`
/// and `1.0.0` are the same release.
#[derive(Debug, Clone)]
pub struct VersionIdentifier(Version);

impl PartialEq for VersionIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionIdentifier {}

impl PartialOrd for VersionIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_precedence(&other.0)
    }
}

impl Hash for VersionIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.major.hash(state);
        self.0.minor.hash(state);
        self.0.patch.hash(state);
        self.0.pre.hash(state);
    }
}

impl VersionIdentifier {
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parse a version string, accepting a leading `v` and the short forms
    /// `1` and `1.2`.
    ///
    /// # Errors
    /// Returns an error when the input is not a recognisable version.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let bare = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        parse_semver(bare).map(Self).ok_or_else(|| VersionParseError {
            input: input.to_string(),
        })
    }

    #[must_use]
    pub fn major(&self) -> u64 {
        self.0.major
    }

    #[must_use]
    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    #[must_use]
    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    #[must_use]
    pub fn as_semver(&self) -> &Version {
        &self.0
    }
}

fn parse_semver(version: &str) -> Option<Version> {
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let (core, suffix) = split_semver_core_and_suffix(version);
    let mut parts = core.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next().map(str::parse::<u64>).transpose().ok()?;
    let patch = parts.next().map(str::parse::<u64>).transpose().ok()?;

    if parts.next().is_some() {
        return None;
    }

    let normalized = match (minor, patch) {
        (None, None) => format!("{major}.0.0{suffix}"),
        (Some(minor), None) => format!("{major}.{minor}.0{suffix}"),
        (Some(minor), Some(patch)) => format!("{major}.{minor}.{patch}{suffix}"),
        (None, Some(_)) => return None,
    };

    Version::parse(&normalized).ok()
}

fn split_semver_core_and_suffix(version: &str) -> (&str, &str) {
    let suffix_idx = version.find(['-', '+']).unwrap_or(version.len());
    (&version[..suffix_idx], &version[suffix_idx..])
}

impl FromStr for VersionIdentifier {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Version> for VersionIdentifier {
    fn from(value: Version) -> Self {
        Self(value)
    }
}

impl Serialize for VersionIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VersionIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
