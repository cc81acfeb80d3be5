//! Process primitives backed by Linux system calls.

use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use nsbox_common::constants::PROC_ROOT;
use nsbox_common::error::Result;
use nsbox_common::types::ProcessId;

use super::{ExitState, ProcessOps};
use crate::process::ProcessConfig;

/// [`ProcessOps`] using `fork`/`execve`, `kill(2)` and `waitpid(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxProcessOps;

impl LinuxProcessOps {
    /// Creates the Linux process primitives.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessOps for LinuxProcessOps {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessId> {
        crate::launcher::spawn_isolated(config)
    }

    fn send_signal(&self, pid: ProcessId, signal: Option<Signal>) -> nix::Result<()> {
        kill(Pid::from_raw(pid.as_raw()), signal)
    }

    fn try_wait(&self, pid: ProcessId) -> nix::Result<Option<ExitState>> {
        match waitpid(Pid::from_raw(pid.as_raw()), Some(WaitPidFlag::WNOHANG))? {
            WaitStatus::Exited(_, code) => Ok(Some(ExitState::Exited(code))),
            WaitStatus::Signaled(_, signal, _) => Ok(Some(ExitState::Signaled(signal as i32))),
            _ => Ok(None),
        }
    }

    fn is_defunct(&self, pid: ProcessId) -> bool {
        let path = format!("{PROC_ROOT}/{pid}/stat");
        std::fs::read_to_string(path)
            .ok()
            .and_then(|stat| stat_state(&stat))
            == Some('Z')
    }
}

/// Extracts the state letter from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain `)`, so the
/// state is the first field after the last closing parenthesis.
fn stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}
