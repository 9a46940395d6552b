use std::ffi::OsString;

use crossbeam_channel::Receiver;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::{CancelHandle, CancelOutcome, UpdateCoordinator, UpdateEvent};
use crate::error::UpdateError;
use crate::state::UpdateState;
use crate::version::VersionIdentifier;

#[derive(Debug)]
enum Command {
    Check(VersionIdentifier),
    CheckDiscontinued(VersionIdentifier),
    Download,
    Verify,
    Install,
    Restart(Vec<OsString>),
    Conclude,
}

/// Presentation-side handle to a coordinator running on a worker task.
///
/// Commands are processed one at a time in the order they were sent.
/// Results arrive as [`UpdateEvent`]s on [`events`](Self::events).
pub struct UpdateHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: Receiver<UpdateEvent>,
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

/// Move `coordinator` onto a task on `runtime`. `events` must be the
/// receiving end of the channel the coordinator publishes to.
#[must_use]
pub fn spawn_worker(
    coordinator: UpdateCoordinator,
    events: Receiver<UpdateEvent>,
    runtime: &tokio::runtime::Handle,
) -> UpdateHandle {
    let cancel = coordinator.cancel_handle();
    let (commands, receiver) = mpsc::unbounded_channel();
    let task = runtime.spawn(run_worker(coordinator, receiver));

    UpdateHandle {
        commands,
        events,
        cancel,
        task,
    }
}

async fn run_worker(
    mut coordinator: UpdateCoordinator,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        debug!("Update worker received {command:?}");
        let result = match command {
            Command::Check(current) => coordinator.check_for_update(&current).await.map(|_| ()),
            Command::CheckDiscontinued(version) => {
                let discontinued = coordinator.is_discontinued(&version).await;
                coordinator.emit(UpdateEvent::Discontinued {
                    version,
                    discontinued,
                });
                Ok(())
            }
            Command::Download => coordinator.download_update().await.map(|_| ()),
            Command::Verify => coordinator.verify(),
            Command::Install => coordinator.install_update().await.map(|_| ()),
            Command::Restart(args) => coordinator.restart(&args).map(|_| ()),
            Command::Conclude => {
                coordinator.settle_cancellation();
                Ok(())
            }
        };

        // Failures were already published as events by the coordinator.
        if let Err(error) = result {
            debug!("Update command finished with error: {error}");
        }
    }
    debug!("Update worker stopped");
}

impl UpdateHandle {
    /// Start a new session.
    ///
    /// # Errors
    /// Returns [`UpdateError::SessionActive`] while a session is running.
    pub fn check(&self, current: VersionIdentifier) -> Result<(), UpdateError> {
        if self.cancel.is_session_active() {
            return Err(UpdateError::SessionActive);
        }
        self.send(Command::Check(current))
    }

    /// Ask whether `current` was withdrawn; answered with
    /// [`UpdateEvent::Discontinued`].
    ///
    /// # Errors
    /// Returns an error when the worker has stopped.
    pub fn check_discontinued(&self, current: VersionIdentifier) -> Result<(), UpdateError> {
        self.send(Command::CheckDiscontinued(current))
    }

    /// # Errors
    /// Returns an error when the worker has stopped.
    pub fn download(&self) -> Result<(), UpdateError> {
        self.send(Command::Download)
    }

    /// # Errors
    /// Returns an error when the worker has stopped.
    pub fn verify(&self) -> Result<(), UpdateError> {
        self.send(Command::Verify)
    }

    /// # Errors
    /// Returns an error when the worker has stopped.
    pub fn install(&self) -> Result<(), UpdateError> {
        self.send(Command::Install)
    }

    /// # Errors
    /// Returns an error when the worker has stopped.
    pub fn restart(&self, args: Vec<OsString>) -> Result<(), UpdateError> {
        self.send(Command::Restart(args))
    }

    /// Cancel the active session. Takes effect immediately for a running
    /// operation; an idle session is concluded once the worker gets to it.
    #[must_use]
    pub fn cancel(&self) -> CancelOutcome {
        let outcome = self.cancel.cancel();
        if outcome == CancelOutcome::Accepted && self.send(Command::Conclude).is_err() {
            debug!("Update worker already stopped while cancelling");
        }
        outcome
    }

    #[must_use]
    pub fn events(&self) -> &Receiver<UpdateEvent> {
        &self.events
    }

    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.cancel.state()
    }

    #[must_use]
    pub fn is_session_active(&self) -> bool {
        self.cancel.is_session_active()
    }

    /// Stop accepting commands and wait for the worker to drain.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(error) = self.task.await {
            debug!("Update worker ended abnormally: {error}");
        }
    }

    fn send(&self, command: Command) -> Result<(), UpdateError> {
        self.commands.send(command).map_err(|_| {
            UpdateError::io(
                "update worker has stopped",
                std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            )
        })
    }
}
