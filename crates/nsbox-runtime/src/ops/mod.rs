//! Capability interface over the OS process primitives.
//!
//! The lifecycle code never calls `fork`, `kill` or `waitpid` directly; it
//! goes through a [`ProcessOps`] chosen when the manager is built. The
//! Linux implementation performs real system calls, the mock keeps an
//! in-memory process model for deterministic tests.

pub mod linux;
pub mod mock;

use nix::sys::signal::Signal;
use nsbox_common::constants::SIGNAL_EXIT_OFFSET;
use nsbox_common::error::Result;
use nsbox_common::types::ProcessId;

use crate::process::ProcessConfig;

/// How a collected child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// The process called `exit` with this status.
    Exited(i32),
    /// The process was killed by this signal number.
    Signaled(i32),
}

impl ExitState {
    /// Returns the shell-style exit code (`128 + signo` for signals).
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signo) => SIGNAL_EXIT_OFFSET + signo,
        }
    }

    /// Returns the terminating signal, if any.
    #[must_use]
    pub const fn signal(self) -> Option<i32> {
        match self {
            Self::Exited(_) => None,
            Self::Signaled(signo) => Some(signo),
        }
    }
}

/// Process primitives the lifecycle code depends on.
///
/// Implementors must be shareable between the caller threads and the
/// monitor thread.
pub trait ProcessOps: Send + Sync {
    /// Launches a process and returns once its program image is running.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::ProcessCreationFailed`](nsbox_common::error::NsboxError::ProcessCreationFailed)
    /// if the process could not be started.
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessId>;

    /// Delivers `signal`, or only checks that `pid` exists when `None`.
    ///
    /// # Errors
    ///
    /// Returns the errno of `kill(2)`.
    fn send_signal(&self, pid: ProcessId, signal: Option<Signal>) -> nix::Result<()>;

    /// Collects the exit status of a child without blocking.
    ///
    /// Returns `Ok(None)` while the child is alive.
    ///
    /// # Errors
    ///
    /// Returns `ECHILD` if `pid` is not an uncollected child of this process.
    fn try_wait(&self, pid: ProcessId) -> nix::Result<Option<ExitState>>;

    /// Returns whether `pid` is a defunct process awaiting collection.
    fn is_defunct(&self, pid: ProcessId) -> bool;
}

/// Returns the process primitives of the running platform.
#[must_use]
pub fn detect_ops() -> Box<dyn ProcessOps> {
    Box::new(linux::LinuxProcessOps::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exited_state_keeps_code() {
        assert_eq!(ExitState::Exited(3).exit_code(), 3);
        assert_eq!(ExitState::Exited(3).signal(), None);
    }

    #[test]
    fn signaled_state_uses_shell_convention() {
        assert_eq!(ExitState::Signaled(9).exit_code(), 137);
        assert_eq!(ExitState::Signaled(15).signal(), Some(15));
    }
}
