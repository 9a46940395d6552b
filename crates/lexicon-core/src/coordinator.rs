use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::cleanup::{CleanupReport, cleanup_stale_artifacts};
use crate::config::UpdaterConfig;
use crate::error::{ErrorKind, UpdateError, UpdateFailure};
use crate::install::{FileSystem, InstallLayout, InstallReport, Installer};
use crate::lock::StagingLock;
use crate::release::{ReleaseDescriptor, ReleaseSource};
use crate::restart::relaunch;
use crate::retry::{retry_with_delays, run_with_timeout};
use crate::state::UpdateState;
use crate::transfer::{ArtifactTransport, DownloadedArtifact, TransferProgress, download_artifact};
use crate::verify::{VerifiedArtifact, VerifyExpectations, verify_artifact};
use crate::version::VersionIdentifier;

/// Monotonic identifier of an update session within one coordinator.
pub type SessionId = u64;

/// Notifications published to the presentation layer.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    StateChanged {
        session: SessionId,
        from: UpdateState,
        to: UpdateState,
    },
    UpdateAvailable {
        session: SessionId,
        release: ReleaseDescriptor,
    },
    Progress {
        session: SessionId,
        progress: TransferProgress,
    },
    /// The session ended in `Failed`.
    Error {
        session: SessionId,
        failure: UpdateFailure,
    },
    /// Something went wrong that does not undo the session's result.
    Warning {
        session: SessionId,
        failure: UpdateFailure,
    },
    /// An operation was refused without touching the active session.
    Rejected { failure: UpdateFailure },
    Installed {
        session: SessionId,
        version: VersionIdentifier,
        backup_removed: bool,
    },
    RestartLaunched { pid: u32 },
    Discontinued {
        version: VersionIdentifier,
        discontinued: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No newer build. `latest` is the newest published version, if any.
    UpToDate { latest: Option<VersionIdentifier> },
    UpdateAvailable(ReleaseDescriptor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Accepted,
    /// The executable swap has already begun.
    Refused,
    NoSession,
}

#[derive(Debug)]
struct SharedStatus {
    state: UpdateState,
    session: Option<SessionId>,
    cancel: CancellationToken,
    commit_started: bool,
}

/// Thread-safe view of the coordinator used to cancel a running operation
/// from outside the task that drives it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Mutex<SharedStatus>>,
}

impl CancelHandle {
    fn status(&self) -> MutexGuard<'_, SharedStatus> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request cancellation of the active session.
    ///
    /// Accepted until the installed executable is about to be moved aside;
    /// refused afterwards.
    #[must_use]
    pub fn cancel(&self) -> CancelOutcome {
        let status = self.status();
        if status.session.is_none() {
            return CancelOutcome::NoSession;
        }
        if status.commit_started {
            info!("Cancellation refused: install is already committing");
            return CancelOutcome::Refused;
        }
        status.cancel.cancel();
        CancelOutcome::Accepted
    }

    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.status().state
    }

    #[must_use]
    pub fn is_session_active(&self) -> bool {
        self.status().session.is_some()
    }
}

struct UpdateSession {
    id: SessionId,
    current: VersionIdentifier,
    candidate: Option<ReleaseDescriptor>,
    verified: Option<VerifiedArtifact>,
    artifact: Option<DownloadedArtifact>,
    _lock: Option<StagingLock>,
    cancel: CancellationToken,
}

/// Drives one update session at a time through check, download, verify,
/// install and restart.
pub struct UpdateCoordinator {
    config: UpdaterConfig,
    layout: InstallLayout,
    source: Arc<dyn ReleaseSource>,
    transport: Arc<dyn ArtifactTransport>,
    fs: Arc<dyn FileSystem>,
    events: Sender<UpdateEvent>,
    shared: Arc<Mutex<SharedStatus>>,
    session: Option<UpdateSession>,
    last_session: SessionId,
    pending_restart: Option<VersionIdentifier>,
}

impl UpdateCoordinator {
    #[must_use]
    pub fn new(
        config: UpdaterConfig,
        source: Arc<dyn ReleaseSource>,
        transport: Arc<dyn ArtifactTransport>,
        fs: Arc<dyn FileSystem>,
        events: Sender<UpdateEvent>,
    ) -> Self {
        let layout = InstallLayout::for_executable(config.install_path.clone());
        Self {
            config,
            layout,
            source,
            transport,
            fs,
            events,
            shared: Arc::new(Mutex::new(SharedStatus {
                state: UpdateState::Idle,
                session: None,
                cancel: CancellationToken::new(),
                commit_started: false,
            })),
            session: None,
            last_session: 0,
            pending_restart: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.status().state
    }

    #[must_use]
    pub fn is_session_active(&self) -> bool {
        self.session.is_some()
    }

    /// Version installed by the last session, waiting for [`restart`].
    ///
    /// [`restart`]: Self::restart
    #[must_use]
    pub fn pending_restart(&self) -> Option<&VersionIdentifier> {
        self.pending_restart.as_ref()
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Ask the release source whether a build newer than `current` exists.
    ///
    /// Starts a new session; refused while another session is active.
    ///
    /// # Errors
    /// Returns [`UpdateError::SessionActive`] when a session is running,
    /// network and release errors after retries are exhausted, and
    /// [`UpdateError::Cancelled`] when the check was cancelled.
    pub async fn check_for_update(
        &mut self,
        current: &VersionIdentifier,
    ) -> Result<CheckOutcome, UpdateError> {
        let (session, cancel) = self.begin_session(current)?;
        self.transition(UpdateState::Checking);
        info!("Checking for updates to {} {current}", self.config.product);

        let source = Arc::clone(&self.source);
        let timeout = self.config.request_timeout;
        let result = retry_with_delays("release query", &self.config.retry_delays, &cancel, || {
            run_with_timeout(timeout, "release query", source.latest_release())
        })
        .await;

        let latest = match result {
            Ok(latest) => latest,
            Err(error) => return Err(self.fail(error)),
        };

        match latest {
            Some(release) if release.version > *current => {
                info!("Update available: {current} -> {}", release.version);
                if let Some(active) = self.session.as_mut() {
                    active.candidate = Some(release.clone());
                }
                self.transition(UpdateState::UpdateAvailable);
                self.emit(UpdateEvent::UpdateAvailable {
                    session,
                    release: release.clone(),
                });
                Ok(CheckOutcome::UpdateAvailable(release))
            }
            latest => {
                let latest = latest.map(|release| release.version);
                info!("{} {current} is up to date", self.config.product);
                self.conclude();
                self.transition(UpdateState::UpToDate);
                Ok(CheckOutcome::UpToDate { latest })
            }
        }
    }

    /// Transfer the candidate build into the staging directory.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidState`] unless an update is available,
    /// [`UpdateError::SessionActive`] when another process holds the staging
    /// lock, [`UpdateError::DownloadInterrupted`] after retries are exhausted
    /// and [`UpdateError::Cancelled`] on cancellation.
    pub async fn download_update(&mut self) -> Result<PathBuf, UpdateError> {
        let (session, cancel) = self.require("download", UpdateState::UpdateAvailable)?;
        let Some(url) = self
            .session
            .as_ref()
            .and_then(|active| active.candidate.as_ref())
            .map(|candidate| candidate.download_url.clone())
        else {
            return Err(self.invalid_state("download"));
        };

        let lock = match StagingLock::acquire(&self.config.staging_dir) {
            Ok(lock) => lock,
            Err(error) => return Err(self.fail(error)),
        };
        if let Some(active) = self.session.as_mut() {
            active._lock = Some(lock);
        }
        self.transition(UpdateState::Downloading);

        let transport = Arc::clone(&self.transport);
        let staging_dir = self.config.staging_dir.clone();
        let chunk_timeout = self.config.chunk_timeout;
        let high_water: Mutex<Option<u64>> = Mutex::new(None);
        let events = &self.events;
        let high_water = &high_water;

        let result = retry_with_delays("download", &self.config.retry_delays, &cancel, || {
            download_artifact(
                transport.as_ref(),
                &url,
                &staging_dir,
                chunk_timeout,
                &cancel,
                move |progress: TransferProgress| {
                    let mut mark = high_water.lock().unwrap_or_else(PoisonError::into_inner);
                    if mark.is_none_or(|seen| progress.received > seen) {
                        *mark = Some(progress.received);
                        let _ = events.send(UpdateEvent::Progress { session, progress });
                    }
                },
            )
        })
        .await;

        match result {
            Ok(artifact) => {
                let path = artifact.path_buf();
                debug!("Update staged at {}", path.display());
                if let Some(active) = self.session.as_mut() {
                    active.artifact = Some(artifact);
                }
                self.transition(UpdateState::Verifying);
                Ok(path)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Check the downloaded artifact before it may be installed. A failure
    /// ends the session.
    ///
    /// # Errors
    /// Returns [`UpdateError::VerificationFailed`] when any check fails.
    pub fn verify(&mut self) -> Result<(), UpdateError> {
        let (_, cancel) = self.require("verify", UpdateState::Verifying)?;
        if cancel.is_cancelled() {
            return Err(self.fail(UpdateError::cancelled("verify")));
        }

        let result = {
            let Some(active) = self.session.as_ref() else {
                return Err(self.invalid_state("verify"));
            };
            if active.verified.is_some() {
                return Ok(());
            }
            let (Some(artifact), Some(candidate)) = (&active.artifact, &active.candidate) else {
                return Err(self.invalid_state("verify"));
            };
            let expectations = VerifyExpectations {
                size: candidate.size,
                sha256: candidate.sha256.as_deref(),
                require_checksum: self.config.require_checksum,
                executable_name: self
                    .layout
                    .executable_name()
                    .unwrap_or(self.config.product.as_str()),
                staging_dir: &self.config.staging_dir,
                max_extracted_size: self.config.max_extracted_size,
            };
            verify_artifact(artifact.path(), &expectations)
        };

        match result {
            Ok(verified) => {
                info!("Update verified (sha256 {})", verified.sha256());
                if let Some(active) = self.session.as_mut() {
                    active.verified = Some(verified);
                }
                Ok(())
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Atomically swap the verified build into the installation path.
    /// Verifies first when [`verify`](Self::verify) has not run yet.
    ///
    /// On success the session concludes and the installed version waits for
    /// [`restart`](Self::restart).
    ///
    /// # Errors
    /// Returns [`UpdateError::InstallationLocked`] when the executable stays
    /// locked, [`UpdateError::Cancelled`] when cancelled before the swap
    /// began, and I/O errors otherwise. The original executable is left in
    /// place in every error case.
    pub async fn install_update(&mut self) -> Result<InstallReport, UpdateError> {
        let (session, _) = self.require("install", UpdateState::Verifying)?;
        if !self
            .session
            .as_ref()
            .is_some_and(|active| active.verified.is_some())
        {
            self.verify()?;
        }
        self.transition(UpdateState::Installing);

        let shared = Arc::clone(&self.shared);
        let result = {
            let Some(active) = self.session.as_ref() else {
                return Err(self.invalid_state("install"));
            };
            let (Some(verified), Some(candidate)) = (&active.verified, &active.candidate) else {
                return Err(self.invalid_state("install"));
            };
            let installer = Installer::new(
                self.fs.as_ref(),
                &self.layout,
                &self.config.lock_retry_delays,
            );
            installer
                .install(verified.executable(), || begin_commit(&shared))
                .await
                .map(|report| (report, candidate.version.clone()))
        };

        match result {
            Ok((report, version)) => {
                if let Some(active) = self.session.as_ref() {
                    info!("Installed {version} over {}", active.current);
                }
                self.conclude();
                self.pending_restart = Some(version.clone());
                self.emit(UpdateEvent::Installed {
                    session,
                    version,
                    backup_removed: report.backup_removed,
                });
                Ok(report)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Launch the freshly installed executable. The caller should exit once
    /// this returns.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidState`] when nothing was installed, and
    /// [`UpdateError::RestartFailed`] (also published as a warning) when the
    /// process could not be started. The installation stays in place either
    /// way.
    pub fn restart(&mut self, args: &[OsString]) -> Result<u32, UpdateError> {
        if self.pending_restart.take().is_none() {
            return Err(self.invalid_state("restart"));
        }
        self.transition(UpdateState::Restarting);

        match relaunch(&self.config.install_path, args) {
            Ok(pid) => {
                self.emit(UpdateEvent::RestartLaunched { pid });
                Ok(pid)
            }
            Err(error) => {
                warn!("Restart failed: {error}");
                self.emit(UpdateEvent::Warning {
                    session: self.last_session,
                    failure: UpdateFailure::from(&error),
                });
                Err(error)
            }
        }
    }

    /// Cancel the active session. A session waiting for the user in
    /// `UpdateAvailable` concludes as `Cancelled` right away.
    pub fn cancel(&mut self) -> CancelOutcome {
        let outcome = self.cancel_handle().cancel();
        if outcome == CancelOutcome::Accepted {
            self.settle_cancellation();
        }
        outcome
    }

    /// Conclude the active session as `Cancelled` if cancellation was
    /// requested through a [`CancelHandle`] while no operation was running.
    /// Returns whether a session was concluded.
    pub fn settle_cancellation(&mut self) -> bool {
        let requested = self
            .session
            .as_ref()
            .is_some_and(|active| active.cancel.is_cancelled());
        if requested {
            self.finish(&UpdateError::cancelled("update"));
        }
        requested
    }

    /// Whether `current` has been withdrawn from the release source, which
    /// makes the update mandatory. Query failures count as "not withdrawn".
    pub async fn is_discontinued(&self, current: &VersionIdentifier) -> bool {
        let result = run_with_timeout(
            self.config.request_timeout,
            "version listing",
            self.source.published_versions(),
        )
        .await;

        match result {
            Ok(versions) if versions.is_empty() => false,
            Ok(versions) => {
                let discontinued = !versions.contains(current);
                if discontinued {
                    warn!("{} {current} is no longer published", self.config.product);
                }
                discontinued
            }
            Err(error) => {
                warn!("Could not list published versions: {error}");
                false
            }
        }
    }

    /// Repair what an interrupted update left behind.
    ///
    /// # Errors
    /// Returns [`UpdateError::SessionActive`] while a session is running, or
    /// an I/O error when a missing installation could not be restored.
    pub fn cleanup_stale_artifacts(&self) -> Result<CleanupReport, UpdateError> {
        if self.session.is_some() {
            return Err(UpdateError::SessionActive);
        }
        cleanup_stale_artifacts(self.fs.as_ref(), &self.layout, &self.config.staging_dir)
    }

    fn status(&self) -> MutexGuard<'_, SharedStatus> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: UpdateEvent) {
        let _ = self.events.send(event);
    }

    fn begin_session(
        &mut self,
        current: &VersionIdentifier,
    ) -> Result<(SessionId, CancellationToken), UpdateError> {
        if self.session.is_some() {
            return Err(self.reject(UpdateError::SessionActive));
        }

        self.last_session += 1;
        let id = self.last_session;
        let cancel = CancellationToken::new();
        {
            let mut status = self.status();
            status.state = UpdateState::Idle;
            status.session = Some(id);
            status.cancel = cancel.clone();
            status.commit_started = false;
        }
        self.pending_restart = None;
        self.session = Some(UpdateSession {
            id,
            current: current.clone(),
            candidate: None,
            verified: None,
            artifact: None,
            _lock: None,
            cancel: cancel.clone(),
        });
        debug!("Started update session {id}");
        Ok((id, cancel))
    }

    fn require(
        &self,
        operation: &'static str,
        expected: UpdateState,
    ) -> Result<(SessionId, CancellationToken), UpdateError> {
        match &self.session {
            Some(active) if self.state() == expected => Ok((active.id, active.cancel.clone())),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> UpdateError {
        self.reject(UpdateError::InvalidState {
            operation,
            state: self.state(),
        })
    }

    fn reject(&self, error: UpdateError) -> UpdateError {
        debug!("Refused update operation: {error}");
        self.emit(UpdateEvent::Rejected {
            failure: UpdateFailure::from(&error),
        });
        error
    }

    fn transition(&self, to: UpdateState) {
        let from = {
            let mut status = self.status();
            let from = status.state;
            if !from.can_transition_to(to) {
                warn!("Ignoring invalid update transition {from} -> {to}");
                return;
            }
            status.state = to;
            from
        };
        debug!("Update session {}: {from} -> {to}", self.last_session);
        self.emit(UpdateEvent::StateChanged {
            session: self.last_session,
            from,
            to,
        });
    }

    fn fail(&mut self, error: UpdateError) -> UpdateError {
        self.finish(&error);
        error
    }

    fn finish(&mut self, error: &UpdateError) {
        let Some(session) = self.session.as_ref().map(|active| active.id) else {
            return;
        };

        self.conclude();
        if error.kind() == ErrorKind::Cancelled {
            info!("Update session {session} cancelled");
            self.transition(UpdateState::Cancelled);
        } else {
            warn!("Update session {session} failed: {error}");
            self.transition(UpdateState::Failed);
            self.emit(UpdateEvent::Error {
                session,
                failure: UpdateFailure::from(error),
            });
        }
    }

    fn conclude(&mut self) {
        self.session = None;
        let mut status = self.status();
        status.session = None;
        status.commit_started = false;
    }
}

fn begin_commit(shared: &Mutex<SharedStatus>) -> Result<(), UpdateError> {
    let mut status = shared.lock().unwrap_or_else(PoisonError::into_inner);
    if status.cancel.is_cancelled() {
        return Err(UpdateError::cancelled("install"));
    }
    status.commit_started = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use crossbeam_channel::Receiver;

    use super::{CancelOutcome, CheckOutcome, UpdateCoordinator, UpdateEvent, begin_commit};
    use crate::config::UpdaterConfig;
    use crate::error::{ErrorKind, UpdateError};
    use crate::install::StdFileSystem;
    use crate::release::{ReleaseDescriptor, ReleaseSource};
    use crate::state::UpdateState;
    use crate::transfer::tests::ChunkedTransport;
    use crate::verify::PackageFormat;
    use crate::version::VersionIdentifier;

    struct FixedSource {
        latest: Option<VersionIdentifier>,
        published: Result<Vec<VersionIdentifier>, ()>,
    }

    #[async_trait]
    impl ReleaseSource for FixedSource {
        fn product(&self) -> &str {
            "lexicon"
        }

        async fn latest_release(&self) -> Result<Option<ReleaseDescriptor>, UpdateError> {
            Ok(self.latest.clone().map(|version| ReleaseDescriptor {
                version,
                download_url: "https://example.com/lexicon".to_string(),
                notes: String::new(),
                published_at: Utc::now(),
                asset_name: None,
                size: None,
                sha256: None,
                release_page: None,
            }))
        }

        async fn published_versions(&self) -> Result<Vec<VersionIdentifier>, UpdateError> {
            self.published
                .clone()
                .map_err(|()| UpdateError::network("version listing", "offline"))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        coordinator: UpdateCoordinator,
        events: Receiver<UpdateEvent>,
    }

    fn harness(source: FixedSource, payload: Vec<u8>) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let install_path = dir.path().join("lexicon");
        std::fs::write(&install_path, b"installed").expect("install written");
        let mut config = UpdaterConfig::new("lexicon", install_path, dir.path().join("staging"));
        config.retry_delays = vec![Duration::ZERO];
        config.lock_retry_delays = vec![Duration::ZERO];

        let (sender, events) = crossbeam_channel::unbounded();
        let coordinator = UpdateCoordinator::new(
            config,
            Arc::new(source),
            Arc::new(ChunkedTransport::new(payload, 64)),
            Arc::new(StdFileSystem),
            sender,
        );
        Harness {
            _dir: dir,
            coordinator,
            events,
        }
    }

    fn newer(latest: VersionIdentifier) -> FixedSource {
        FixedSource {
            latest: Some(latest),
            published: Ok(Vec::new()),
        }
    }

    fn native_binary() -> Vec<u8> {
        let mut bytes = PackageFormat::native().magic().to_vec();
        bytes.extend_from_slice(&[7; 256]);
        bytes
    }

    fn transitions(events: &Receiver<UpdateEvent>) -> Vec<UpdateState> {
        events
            .try_iter()
            .filter_map(|event| match event {
                UpdateEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn no_published_release_is_up_to_date() {
        let mut h = harness(
            FixedSource {
                latest: None,
                published: Ok(Vec::new()),
            },
            Vec::new(),
        );

        let outcome = h
            .coordinator
            .check_for_update(&VersionIdentifier::new(1, 0, 0))
            .await
            .expect("check should succeed");

        assert_eq!(outcome, CheckOutcome::UpToDate { latest: None });
        assert!(!h.coordinator.is_session_active());
        assert_eq!(
            transitions(&h.events),
            vec![UpdateState::Checking, UpdateState::UpToDate]
        );
    }

    #[tokio::test]
    async fn second_check_is_refused_while_update_is_pending() {
        let mut h = harness(newer(VersionIdentifier::new(1, 1, 0)), native_binary());
        let current = VersionIdentifier::new(1, 0, 0);

        h.coordinator
            .check_for_update(&current)
            .await
            .expect("first check should succeed");
        let error = h
            .coordinator
            .check_for_update(&current)
            .await
            .expect_err("second check must be refused");

        assert_eq!(error.kind(), ErrorKind::SessionActive);
        assert_eq!(h.coordinator.state(), UpdateState::UpdateAvailable);
    }

    #[tokio::test]
    async fn operations_out_of_order_are_rejected() {
        let mut h = harness(newer(VersionIdentifier::new(1, 1, 0)), native_binary());

        let error = h
            .coordinator
            .download_update()
            .await
            .expect_err("download without a check must fail");
        assert_eq!(error.kind(), ErrorKind::InvalidState);

        let error = h
            .coordinator
            .restart(&[])
            .expect_err("restart without an install must fail");
        assert_eq!(error.kind(), ErrorKind::InvalidState);
        assert_eq!(h.coordinator.state(), UpdateState::Idle);
    }

    #[tokio::test]
    async fn declining_an_update_concludes_as_cancelled() {
        let mut h = harness(newer(VersionIdentifier::new(1, 1, 0)), native_binary());
        assert_eq!(h.coordinator.cancel(), CancelOutcome::NoSession);

        h.coordinator
            .check_for_update(&VersionIdentifier::new(1, 0, 0))
            .await
            .expect("check should succeed");

        assert_eq!(h.coordinator.cancel(), CancelOutcome::Accepted);
        assert_eq!(h.coordinator.state(), UpdateState::Cancelled);
        assert!(!h.coordinator.is_session_active());
    }

    #[test]
    fn cancel_is_refused_once_commit_has_begun() {
        let h = harness(newer(VersionIdentifier::new(1, 1, 0)), native_binary());
        let handle = h.coordinator.cancel_handle();
        {
            let mut status = h.coordinator.status();
            status.session = Some(1);
        }

        begin_commit(&h.coordinator.shared).expect("commit should begin");
        assert_eq!(handle.cancel(), CancelOutcome::Refused);
    }

    #[test]
    fn cancel_before_commit_blocks_the_swap() {
        let h = harness(newer(VersionIdentifier::new(1, 1, 0)), native_binary());
        {
            let mut status = h.coordinator.status();
            status.session = Some(1);
        }

        assert_eq!(h.coordinator.cancel_handle().cancel(), CancelOutcome::Accepted);
        let error = begin_commit(&h.coordinator.shared).expect_err("commit must be refused");
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn full_session_installs_and_waits_for_restart() {
        let payload = native_binary();
        let mut h = harness(newer(VersionIdentifier::new(1, 1, 0)), payload.clone());

        h.coordinator
            .check_for_update(&VersionIdentifier::new(1, 0, 0))
            .await
            .expect("check should succeed");
        h.coordinator
            .download_update()
            .await
            .expect("download should succeed");
        h.coordinator.verify().expect("verify should pass");
        let report = h
            .coordinator
            .install_update()
            .await
            .expect("install should succeed");

        assert!(report.backup_removed);
        assert_eq!(
            std::fs::read(&h.coordinator.config().install_path).expect("install readable"),
            payload
        );
        assert_eq!(
            h.coordinator.pending_restart(),
            Some(&VersionIdentifier::new(1, 1, 0))
        );
        assert_eq!(
            transitions(&h.events),
            vec![
                UpdateState::Checking,
                UpdateState::UpdateAvailable,
                UpdateState::Downloading,
                UpdateState::Verifying,
                UpdateState::Installing,
            ]
        );
    }

    #[tokio::test]
    async fn install_runs_verification_when_skipped() {
        let mut h = harness(newer(VersionIdentifier::new(1, 1, 0)), b"not a binary".to_vec());

        h.coordinator
            .check_for_update(&VersionIdentifier::new(1, 0, 0))
            .await
            .expect("check should succeed");
        h.coordinator
            .download_update()
            .await
            .expect("download should succeed");
        let error = h
            .coordinator
            .install_update()
            .await
            .expect_err("unverifiable artifact must not install");

        assert_eq!(error.kind(), ErrorKind::VerificationFailed);
        assert_eq!(h.coordinator.state(), UpdateState::Failed);
        assert_eq!(
            std::fs::read(&h.coordinator.config().install_path).expect("install readable"),
            b"installed"
        );
    }

    #[tokio::test]
    async fn discontinued_when_current_is_not_published() {
        let h = harness(
            FixedSource {
                latest: None,
                published: Ok(vec![VersionIdentifier::new(2, 0, 0)]),
            },
            Vec::new(),
        );
        assert!(
            h.coordinator
                .is_discontinued(&VersionIdentifier::new(1, 0, 0))
                .await
        );
        assert!(
            !h.coordinator
                .is_discontinued(&VersionIdentifier::new(2, 0, 0))
                .await
        );
    }

    #[tokio::test]
    async fn failed_version_listing_is_not_discontinued() {
        let h = harness(
            FixedSource {
                latest: None,
                published: Err(()),
            },
            Vec::new(),
        );
        assert!(
            !h.coordinator
                .is_discontinued(&VersionIdentifier::new(1, 0, 0))
                .await
        );
    }

    #[tokio::test]
    async fn build_tagged_release_of_current_version_is_up_to_date() {
        let tagged = VersionIdentifier::parse("v1.0.0+build.7").expect("tag parses");
        let mut h = harness(newer(tagged.clone()), native_binary());

        let outcome = h
            .coordinator
            .check_for_update(&VersionIdentifier::new(1, 0, 0))
            .await
            .expect("check should succeed");

        assert_eq!(
            outcome,
            CheckOutcome::UpToDate {
                latest: Some(tagged)
            }
        );
        assert!(!h.coordinator.is_session_active());
        assert_eq!(
            transitions(&h.events),
            vec![UpdateState::Checking, UpdateState::UpToDate]
        );
    }

    #[tokio::test]
    async fn build_tagged_listing_keeps_current_version_supported() {
        let h = harness(
            FixedSource {
                latest: None,
                published: Ok(vec![
                    VersionIdentifier::parse("1.0.0+win").expect("tag parses"),
                    VersionIdentifier::new(1, 1, 0),
                ]),
            },
            Vec::new(),
        );
        assert!(
            !h.coordinator
                .is_discontinued(&VersionIdentifier::new(1, 0, 0))
                .await
        );
    }
}
