//! Self-update engine for Lexicon.
//!
//! This crate holds all update logic and none of the presentation:
//! - Release discovery behind [`ReleaseSource`] (GitHub releases by default).
//! - Streaming downloads into a private staging directory.
//! - Artifact verification (format, size, SHA-256, zip packages).
//! - Atomic executable replacement with rollback.
//! - The [`UpdateCoordinator`] state machine and its worker task.

mod cleanup;
mod config;
mod coordinator;
mod error;
mod github;
mod install;
mod lock;
mod release;
mod restart;
mod retry;
mod state;
mod transfer;
mod verify;
mod version;
mod worker;

/// Startup repair of interrupted updates.
pub use cleanup::{CleanupReport, cleanup_stale_artifacts};
/// Coordinator construction settings and their defaults.
pub use config::{UpdaterConfig, default_lock_retry_delays, default_retry_delays};
/// Update session state machine and its notifications.
pub use coordinator::{
    CancelHandle, CancelOutcome, CheckOutcome, SessionId, UpdateCoordinator, UpdateEvent,
};
pub use error::{ErrorKind, UpdateError, UpdateFailure};
/// GitHub releases implementation of [`ReleaseSource`].
pub use github::{
    GitHubAsset, GitHubRelease, GitHubReleaseSource, descriptor_from_release, parse_releases,
    platform_asset_stem,
};
/// Executable swap primitives and the filesystem seam they run on.
pub use install::{FileSystem, InstallLayout, InstallReport, Installer, StdFileSystem};
pub use lock::StagingLock;
pub use release::{ReleaseDescriptor, ReleaseSource};
pub use restart::relaunch;
pub use state::UpdateState;
/// Artifact transfer over a pluggable byte-stream transport.
pub use transfer::{
    ArtifactStream, ArtifactTransport, DownloadedArtifact, HttpTransport, TransferProgress,
    download_artifact,
};
pub use verify::{PackageFormat, VerifiedArtifact, VerifyExpectations, verify_artifact};
pub use version::{VersionIdentifier, VersionParseError};
/// Background task owning a coordinator, and the handle that talks to it.
pub use worker::{UpdateHandle, spawn_worker};
