use lexicon_core::{ErrorKind, UpdateError, UpdateFailure};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppErrorDetail {
    Message(String),
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
    Update(UpdateFailure),
}

impl std::fmt::Display for AppErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => write!(f, "{message}"),
            Self::Io { kind, message } => write!(f, "{kind}: {message}"),
            Self::Update(failure) => write!(f, "{failure}"),
        }
    }
}

impl From<String> for AppErrorDetail {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for AppErrorDetail {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<std::io::Error> for AppErrorDetail {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<UpdateError> for AppErrorDetail {
    fn from(value: UpdateError) -> Self {
        Self::Update(UpdateFailure::from(&value))
    }
}

impl From<UpdateFailure> for AppErrorDetail {
    fn from(value: UpdateFailure) -> Self {
        Self::Update(value)
    }
}

impl From<lexicon_platform::AppPathsError> for AppErrorDetail {
    fn from(value: lexicon_platform::AppPathsError) -> Self {
        Self::Message(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    Startup {
        step: &'static str,
        details: AppErrorDetail,
    },
    UpdateFailed {
        phase: &'static str,
        details: AppErrorDetail,
    },
    UpdateCheckFailed {
        details: AppErrorDetail,
    },
    /// The running version is withdrawn and the user declined the update.
    UpdateDeclined,
    WorkerStopped,
    OpenFailed {
        target: String,
        details: AppErrorDetail,
    },
}

impl AppError {
    pub fn startup(step: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::Startup {
            step,
            details: details.into(),
        }
    }

    pub fn update_failed(phase: &'static str, details: impl Into<AppErrorDetail>) -> Self {
        Self::UpdateFailed {
            phase,
            details: details.into(),
        }
    }

    pub fn update_check_failed(details: impl Into<AppErrorDetail>) -> Self {
        Self::UpdateCheckFailed {
            details: details.into(),
        }
    }

    pub fn open_failed(target: impl Into<String>, details: impl Into<AppErrorDetail>) -> Self {
        Self::OpenFailed {
            target: target.into(),
            details: details.into(),
        }
    }

    /// Phase name used in messages for a failure reported by the coordinator.
    pub fn phase_for(kind: ErrorKind) -> &'static str {
        match kind {
            ErrorKind::NetworkUnavailable | ErrorKind::DownloadInterrupted => "download",
            ErrorKind::MalformedRelease => "release lookup",
            ErrorKind::VerificationFailed => "verification",
            ErrorKind::InstallationLocked | ErrorKind::Io => "install",
            ErrorKind::RestartFailed => "restart",
            ErrorKind::Cancelled | ErrorKind::SessionActive | ErrorKind::InvalidState => "session",
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup { step, details } => write!(f, "Startup {step} failed: {details}"),
            Self::UpdateFailed { phase, details } => {
                write!(f, "App update {phase} failed: {details}")
            }
            Self::UpdateCheckFailed { details } => write!(f, "Update check failed: {details}"),
            Self::UpdateDeclined => write!(
                f,
                "This version is no longer supported and the update was declined"
            ),
            Self::WorkerStopped => write!(f, "Update worker stopped unexpectedly"),
            Self::OpenFailed { target, details } => {
                write!(f, "Failed to open {target}: {details}")
            }
        }
    }
}

impl std::error::Error for AppError {}
