use std::fmt;

/// Lifecycle of one update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateState {
    Idle,
    Checking,
    UpToDate,
    UpdateAvailable,
    Downloading,
    Verifying,
    Installing,
    Restarting,
    Failed,
    Cancelled,
}

impl UpdateState {
    /// States after which a session is over. `Restarting` is the hand-off
    /// point just before the process is replaced.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::UpToDate | Self::Restarting | Self::Failed | Self::Cancelled
        )
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if matches!(next, Self::Failed | Self::Cancelled) {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Self::Idle, Self::Checking)
                | (Self::Checking, Self::UpToDate | Self::UpdateAvailable)
                | (Self::UpdateAvailable, Self::Downloading)
                | (Self::Downloading, Self::Verifying)
                | (Self::Verifying, Self::Installing)
                | (Self::Installing, Self::Restarting)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::UpToDate => "up to date",
            Self::UpdateAvailable => "update available",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Installing => "installing",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
