//! Terminal front end for the update coordinator.
//!
//! [`UpdateFlow`] turns coordinator notifications into the next thing the
//! front end should do; [`run_flow`] drives it against a live worker.

use std::io::{BufRead, Write};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use log::{debug, warn};

use lexicon_core::{
    ReleaseDescriptor, TransferProgress, UpdateEvent, UpdateFailure, UpdateHandle, UpdateState,
    VersionIdentifier,
};

use crate::error::AppError;

const EVENT_RECV_TIMEOUT: Duration = Duration::from_millis(250);
const PROGRESS_BAR_WIDTH: usize = 30;
const NOTES_PREVIEW_LINES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    /// Report whether an update exists, change nothing.
    CheckOnly,
    /// Ask before downloading.
    Interactive,
    /// Download and install without asking.
    AutoConfirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    UpToDate,
    Available {
        release: ReleaseDescriptor,
        mandatory: bool,
    },
    Declined,
    Cancelled,
    /// The new build was launched; this process should exit.
    Restarting {
        pid: u32,
    },
    /// Installed, but the new build could not be launched automatically.
    InstalledRestartManually {
        version: VersionIdentifier,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Download,
    Install,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Wait,
    Ask {
        release: ReleaseDescriptor,
        mandatory: bool,
    },
    Send(Action),
    Done(Result<FlowOutcome, AppError>),
}

/// Front-end side of one update session.
#[derive(Debug)]
pub struct UpdateFlow {
    mode: FlowMode,
    discontinued: Option<bool>,
    offered: Option<ReleaseDescriptor>,
    failed_from: Option<UpdateState>,
    installed: Option<VersionIdentifier>,
}

impl UpdateFlow {
    pub fn new(mode: FlowMode) -> Self {
        Self {
            mode,
            discontinued: None,
            offered: None,
            failed_from: None,
            installed: None,
        }
    }

    fn mandatory(&self) -> bool {
        self.discontinued.unwrap_or(false)
    }

    pub fn on_event(&mut self, event: &UpdateEvent) -> Step {
        match event {
            UpdateEvent::Discontinued { discontinued, .. } => {
                self.discontinued = Some(*discontinued);
                match self.offered.clone() {
                    Some(release) => self.offer(release),
                    None => Step::Wait,
                }
            }
            UpdateEvent::UpdateAvailable { release, .. } => {
                self.offered = Some(release.clone());
                if self.discontinued.is_some() {
                    self.offer(release.clone())
                } else {
                    Step::Wait
                }
            }
            UpdateEvent::StateChanged { from, to, .. } => match to {
                UpdateState::UpToDate => Step::Done(Ok(FlowOutcome::UpToDate)),
                UpdateState::Cancelled => Step::Done(Ok(FlowOutcome::Cancelled)),
                UpdateState::Verifying => Step::Send(Action::Install),
                UpdateState::Failed => {
                    self.failed_from = Some(*from);
                    Step::Wait
                }
                _ => Step::Wait,
            },
            UpdateEvent::Error { failure, .. } => Step::Done(Err(self.failure_error(failure))),
            UpdateEvent::Rejected { failure } => {
                Step::Done(Err(AppError::update_failed("session", failure.clone())))
            }
            UpdateEvent::Installed { version, .. } => {
                self.installed = Some(version.clone());
                Step::Send(Action::Restart)
            }
            UpdateEvent::RestartLaunched { pid } => {
                Step::Done(Ok(FlowOutcome::Restarting { pid: *pid }))
            }
            UpdateEvent::Warning { failure, .. } => {
                warn!("Update warning: {failure}");
                match self.installed.clone() {
                    Some(version) => {
                        Step::Done(Ok(FlowOutcome::InstalledRestartManually { version }))
                    }
                    None => Step::Wait,
                }
            }
            UpdateEvent::Progress { .. } => Step::Wait,
        }
    }

    /// Apply the user's answer to an [`Step::Ask`].
    pub fn answer(&mut self, accepted: bool) -> Step {
        if accepted {
            return Step::Send(Action::Download);
        }
        if self.mandatory() {
            Step::Done(Err(AppError::UpdateDeclined))
        } else {
            Step::Done(Ok(FlowOutcome::Declined))
        }
    }

    fn offer(&mut self, release: ReleaseDescriptor) -> Step {
        let mandatory = self.mandatory();
        match self.mode {
            FlowMode::CheckOnly => Step::Done(Ok(FlowOutcome::Available { release, mandatory })),
            FlowMode::AutoConfirm => Step::Send(Action::Download),
            FlowMode::Interactive => Step::Ask { release, mandatory },
        }
    }

    fn failure_error(&self, failure: &UpdateFailure) -> AppError {
        if self.failed_from == Some(UpdateState::Checking) {
            AppError::update_check_failed(failure.clone())
        } else {
            AppError::update_failed(AppError::phase_for(failure.kind), failure.clone())
        }
    }
}

pub trait Prompt {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Reads a y/N answer from standard input. Anything but yes is a no.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn confirm(&mut self, question: &str) -> bool {
        print!("{question} [y/N] ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(_) => parse_answer(&line),
            Err(error) => {
                debug!("Could not read answer: {error}");
                false
            }
        }
    }
}

pub fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Run one session on `handle` until it reaches an outcome.
///
/// # Errors
/// Returns the failure the coordinator reported, [`AppError::UpdateDeclined`]
/// when a mandatory update was refused, and [`AppError::WorkerStopped`] when
/// the worker went away.
pub fn run_flow(
    handle: &UpdateHandle,
    current: &VersionIdentifier,
    mode: FlowMode,
    prompt: &mut dyn Prompt,
    out: &mut dyn Write,
) -> Result<FlowOutcome, AppError> {
    handle
        .check_discontinued(current.clone())
        .map_err(|_| AppError::WorkerStopped)?;
    handle
        .check(current.clone())
        .map_err(AppError::update_check_failed)?;

    let mut flow = UpdateFlow::new(mode);
    let mut progress_visible = false;

    let result = loop {
        let event = match handle.events().recv_timeout(EVENT_RECV_TIMEOUT) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break Err(AppError::WorkerStopped),
        };

        render_event(&event, &mut progress_visible, out);
        let mut step = flow.on_event(&event);

        if let Step::Ask { release, mandatory } = &step {
            let _ = writeln!(out, "{}", describe_release(release, current, *mandatory));
            let question = if *mandatory {
                "Install it now? Declining closes Lexicon."
            } else {
                "Download and install it now?"
            };
            step = flow.answer(prompt.confirm(question));
        }

        match step {
            Step::Wait | Step::Ask { .. } => {}
            Step::Send(action) => {
                let sent = match action {
                    Action::Download => handle.download(),
                    Action::Install => handle.install(),
                    Action::Restart => handle.restart(Vec::new()),
                };
                if sent.is_err() {
                    break Err(AppError::WorkerStopped);
                }
            }
            Step::Done(result) => break result,
        }
    };

    if handle.is_session_active() {
        debug!("Concluding update session left open: {:?}", handle.cancel());
    }
    result
}

fn render_event(event: &UpdateEvent, progress_visible: &mut bool, out: &mut dyn Write) {
    match event {
        UpdateEvent::Progress { progress, .. } => {
            let _ = write!(out, "\r{}", render_progress(progress));
            let _ = out.flush();
            *progress_visible = true;
        }
        UpdateEvent::StateChanged { to, .. } => {
            if *progress_visible {
                let _ = writeln!(out);
                *progress_visible = false;
            }
            match to {
                UpdateState::Checking => {
                    let _ = writeln!(out, "Checking for updates...");
                }
                UpdateState::Downloading => {
                    let _ = writeln!(out, "Downloading update...");
                }
                UpdateState::Installing => {
                    let _ = writeln!(out, "Installing update...");
                }
                _ => {}
            }
        }
        UpdateEvent::Installed { version, .. } => {
            let _ = writeln!(out, "Lexicon {version} installed.");
        }
        UpdateEvent::Warning { failure, .. } => {
            let _ = writeln!(out, "Warning: {failure}");
        }
        _ => {}
    }
}

pub fn describe_release(
    release: &ReleaseDescriptor,
    current: &VersionIdentifier,
    mandatory: bool,
) -> String {
    let mut text = format!(
        "Lexicon {} is available (you have {current}), published {}.",
        release.version,
        release.published_at.format("%Y-%m-%d")
    );
    if mandatory {
        text.push_str("\nThis version is no longer supported; the update is required.");
    }

    let notes: Vec<&str> = release.notes.lines().collect();
    if !notes.is_empty() {
        text.push_str("\n\nRelease notes:");
        for line in notes.iter().take(NOTES_PREVIEW_LINES) {
            text.push_str("\n  ");
            text.push_str(line);
        }
        if notes.len() > NOTES_PREVIEW_LINES {
            text.push_str("\n  ...");
        }
    }
    if let Some(page) = &release.release_page {
        text.push_str("\n\nDetails: ");
        text.push_str(page);
    }
    text
}

pub fn render_progress(progress: &TransferProgress) -> String {
    let received = format_bytes(progress.received);
    match (progress.fraction(), progress.total) {
        (Some(fraction), Some(total)) => {
            let filled = bar_cells(fraction);
            format!(
                "[{}{}] {:>3}% {received} / {}",
                "#".repeat(filled),
                ".".repeat(PROGRESS_BAR_WIDTH - filled),
                progress.percent().unwrap_or(0),
                format_bytes(total)
            )
        }
        _ => format!("Downloaded {received}"),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn bar_cells(fraction: f64) -> usize {
    ((fraction * PROGRESS_BAR_WIDTH as f64).floor() as usize).min(PROGRESS_BAR_WIDTH)
}

#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
