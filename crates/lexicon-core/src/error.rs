use std::path::Path;

use thiserror::Error;

use crate::state::UpdateState;

/// Coarse classification of an update failure, used by the presentation
/// layer for messaging and by the coordinator for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkUnavailable,
    MalformedRelease,
    DownloadInterrupted,
    VerificationFailed,
    InstallationLocked,
    RestartFailed,
    Cancelled,
    SessionActive,
    InvalidState,
    Io,
}

impl ErrorKind {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkUnavailable | Self::DownloadInterrupted | Self::InstallationLocked
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkUnavailable => "network unavailable",
            Self::MalformedRelease => "malformed release",
            Self::DownloadInterrupted => "download interrupted",
            Self::VerificationFailed => "verification failed",
            Self::InstallationLocked => "installation locked",
            Self::RestartFailed => "restart failed",
            Self::Cancelled => "cancelled",
            Self::SessionActive => "session active",
            Self::InvalidState => "invalid state",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("network unavailable during {context}: {details}")]
    NetworkUnavailable {
        context: &'static str,
        details: String,
    },
    #[error("malformed release: {0}")]
    MalformedRelease(String),
    #[error("download interrupted after {received} bytes: {details}")]
    DownloadInterrupted { received: u64, details: String },
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("{context}: installation is locked: {source}")]
    InstallationLocked {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to relaunch updated executable: {source}")]
    RestartFailed {
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },
    #[error("an update session is already active")]
    SessionActive,
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: UpdateState,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl UpdateError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    pub fn network(context: &'static str, details: impl std::fmt::Display) -> Self {
        Self::NetworkUnavailable {
            context,
            details: details.to_string(),
        }
    }

    pub fn interrupted(received: u64, details: impl std::fmt::Display) -> Self {
        Self::DownloadInterrupted {
            received,
            details: details.to_string(),
        }
    }

    pub fn malformed(details: impl Into<String>) -> Self {
        Self::MalformedRelease(details.into())
    }

    pub fn verification(details: impl Into<String>) -> Self {
        Self::VerificationFailed(details.into())
    }

    pub fn cancelled(operation: &'static str) -> Self {
        Self::Cancelled { operation }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkUnavailable { .. } => ErrorKind::NetworkUnavailable,
            Self::MalformedRelease(_) => ErrorKind::MalformedRelease,
            Self::DownloadInterrupted { .. } => ErrorKind::DownloadInterrupted,
            Self::VerificationFailed(_) => ErrorKind::VerificationFailed,
            Self::InstallationLocked { .. } => ErrorKind::InstallationLocked,
            Self::RestartFailed { .. } => ErrorKind::RestartFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::SessionActive => ErrorKind::SessionActive,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Cloneable snapshot of an [`UpdateError`] delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&UpdateError> for UpdateFailure {
    fn from(error: &UpdateError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, UpdateError, UpdateFailure};

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(UpdateError::network("release query", "offline").is_retryable());
        assert!(UpdateError::interrupted(10, "reset").is_retryable());
        assert!(
            UpdateError::InstallationLocked {
                context: "rename",
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }
            .is_retryable()
        );
    }

    #[test]
    fn structural_kinds_are_not_retryable() {
        assert!(!UpdateError::malformed("no tag").is_retryable());
        assert!(!UpdateError::verification("checksum mismatch").is_retryable());
        assert!(!UpdateError::cancelled("download").is_retryable());
        assert!(!UpdateError::SessionActive.is_retryable());
    }

    #[test]
    fn failure_snapshot_keeps_kind_and_message() {
        let error = UpdateError::interrupted(512, "connection reset");
        let failure = UpdateFailure::from(&error);
        assert_eq!(failure.kind, ErrorKind::DownloadInterrupted);
        assert_eq!(
            failure.message,
            "download interrupted after 512 bytes: connection reset"
        );
    }
}
