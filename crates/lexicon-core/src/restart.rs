use std::ffi::OsString;
use std::path::Path;

use lexicon_platform::Detach as _;
use log::info;

use crate::error::UpdateError;

/// Launch `executable` as an independent process and return its pid.
///
/// The caller is expected to exit right after; nothing waits on the child.
///
/// # Errors
/// Returns [`UpdateError::RestartFailed`] when the process cannot be spawned.
pub fn relaunch(executable: &Path, args: &[OsString]) -> Result<u32, UpdateError> {
    let mut command = launch_command(executable, args);
    info!("Relaunching {}", executable.display());
    let child = command
        .detach()
        .spawn()
        .map_err(|source| UpdateError::RestartFailed { source })?;
    Ok(child.id())
}

#[cfg(target_os = "macos")]
fn launch_command(executable: &Path, args: &[OsString]) -> std::process::Command {
    match app_bundle(executable) {
        Some(bundle) => {
            let mut command = std::process::Command::new("open");
            command.arg("-n").arg(bundle);
            if !args.is_empty() {
                command.arg("--args").args(args);
            }
            command
        }
        None => {
            let mut command = std::process::Command::new(executable);
            command.args(args);
            command
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn launch_command(executable: &Path, args: &[OsString]) -> std::process::Command {
    let mut command = std::process::Command::new(executable);
    command.args(args);
    command
}

/// `Foo.app` for an executable at `Foo.app/Contents/MacOS/foo`.
#[cfg(any(target_os = "macos", test))]
fn app_bundle(executable: &Path) -> Option<&Path> {
    let bundle = executable.parent()?.parent()?.parent()?;
    bundle
        .extension()
        .is_some_and(|extension| extension == "app")
        .then_some(bundle)
}
