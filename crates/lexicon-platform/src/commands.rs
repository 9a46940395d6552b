#[cfg(unix)]
use std::os::unix::process::CommandExt as _;
#[cfg(windows)]
use std::os::windows::process::CommandExt as _;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Spawn a child that outlives its parent and does not share its console or
/// process group.
pub trait Detach {
    fn detach(&mut self) -> &mut Self;
}

impl Detach for std::process::Command {
    #[cfg(windows)]
    fn detach(&mut self) -> &mut Self {
        self.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP)
    }

    #[cfg(unix)]
    fn detach(&mut self) -> &mut Self {
        self.process_group(0)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
    }

    #[cfg(not(any(unix, windows)))]
    fn detach(&mut self) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::Detach;

    #[test]
    fn std_command_detach_is_chainable() {
        let mut cmd = std::process::Command::new("echo");
        let before = &raw mut cmd;
        let after = cmd.detach() as *mut std::process::Command;
        assert_eq!(before, after);
    }
}
