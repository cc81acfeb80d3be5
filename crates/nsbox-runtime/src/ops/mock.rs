//! In-memory process model for tests.
//!
//! [`MockProcessOps`] hands out fake identifiers and lets the test decide
//! when each process exits, whether it ignores catchable signals, and
//! whether the next spawn fails. It never touches the real system.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::ProcessId;

use super::{ExitState, ProcessOps};
use crate::process::ProcessConfig;

/// First identifier handed out by the mock.
const FIRST_MOCK_PID: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Life {
    Alive,
    Exited(ExitState),
    Collected,
}

#[derive(Debug)]
struct MockProcess {
    life: Life,
    ignores_signals: bool,
    is_child: bool,
    defunct: bool,
    signals: Vec<Signal>,
}

#[derive(Debug, Default)]
struct MockState {
    next_pid: i32,
    processes: HashMap<ProcessId, MockProcess>,
    spawn_failure: Option<Errno>,
    spawned: Vec<ProcessConfig>,
}

/// Scriptable [`ProcessOps`] implementation.
#[derive(Debug)]
pub struct MockProcessOps {
    state: Mutex<MockState>,
}

impl Default for MockProcessOps {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessOps {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_pid: FIRST_MOCK_PID,
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next [`spawn`](ProcessOps::spawn) fail with `errno`.
    pub fn fail_next_spawn(&self, errno: Errno) {
        self.state().spawn_failure = Some(errno);
    }

    /// Makes a running process exit with `code`.
    pub fn exit(&self, pid: ProcessId, code: i32) {
        self.finish(pid, ExitState::Exited(code));
    }

    /// Makes a running process die from `signal`.
    pub fn kill_with(&self, pid: ProcessId, signal: Signal) {
        self.finish(pid, ExitState::Signaled(signal as i32));
    }

    /// Makes a process ignore every signal except `SIGKILL`.
    pub fn ignore_signals(&self, pid: ProcessId) {
        if let Some(process) = self.state().processes.get_mut(&pid) {
            process.ignores_signals = true;
        }
    }

    /// Turns a process into one this parent cannot collect, optionally defunct.
    pub fn detach(&self, pid: ProcessId, defunct: bool) {
        if let Some(process) = self.state().processes.get_mut(&pid) {
            process.is_child = false;
            process.defunct = defunct;
        }
    }

    /// Removes every trace of a process, as if its identifier went stale.
    pub fn vanish(&self, pid: ProcessId) {
        let _ = self.state().processes.remove(&pid);
    }

    /// Returns the signals delivered to `pid`, in order.
    #[must_use]
    pub fn signals(&self, pid: ProcessId) -> Vec<Signal> {
        self.state()
            .processes
            .get(&pid)
            .map(|p| p.signals.clone())
            .unwrap_or_default()
    }

    /// Returns the configurations passed to successful spawns.
    #[must_use]
    pub fn spawned(&self) -> Vec<ProcessConfig> {
        self.state().spawned.clone()
    }

    fn finish(&self, pid: ProcessId, state: ExitState) {
        if let Some(process) = self.state().processes.get_mut(&pid) {
            if process.life == Life::Alive {
                process.life = Life::Exited(state);
            }
        }
    }
}

impl ProcessOps for MockProcessOps {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessId> {
        config.validate()?;
        let mut state = self.state();
        if let Some(errno) = state.spawn_failure.take() {
            return Err(NsboxError::ProcessCreationFailed {
                command: config.command_line(),
                source: errno.into(),
            });
        }
        let pid = ProcessId::new(state.next_pid);
        state.next_pid += 1;
        let _ = state.processes.insert(
            pid,
            MockProcess {
                life: Life::Alive,
                ignores_signals: false,
                is_child: true,
                defunct: false,
                signals: Vec::new(),
            },
        );
        state.spawned.push(config.clone());
        Ok(pid)
    }

    fn send_signal(&self, pid: ProcessId, signal: Option<Signal>) -> nix::Result<()> {
        let mut state = self.state();
        let process = state
            .processes
            .get_mut(&pid)
            .filter(|p| p.life != Life::Collected)
            .ok_or(Errno::ESRCH)?;
        let Some(signal) = signal else {
            return Ok(());
        };
        process.signals.push(signal);
        if process.life == Life::Alive && (signal == Signal::SIGKILL || !process.ignores_signals) {
            process.life = Life::Exited(ExitState::Signaled(signal as i32));
        }
        Ok(())
    }

    fn try_wait(&self, pid: ProcessId) -> nix::Result<Option<ExitState>> {
        let mut state = self.state();
        let process = state
            .processes
            .get_mut(&pid)
            .filter(|p| p.is_child)
            .ok_or(Errno::ECHILD)?;
        match process.life {
            Life::Alive => Ok(None),
            Life::Exited(exit) => {
                process.life = Life::Collected;
                Ok(Some(exit))
            }
            Life::Collected => Err(Errno::ECHILD),
        }
    }

    fn is_defunct(&self, pid: ProcessId) -> bool {
        self.state().processes.get(&pid).is_some_and(|p| p.defunct)
    }
}
