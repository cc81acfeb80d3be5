//! Background reconciliation of process status.
//!
//! A [`ProcessMonitor`] owns one thread that periodically checks every
//! live process, records exits in the table, delivers each exit to the
//! registered callback exactly once, and sweeps delivered records.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::{ProcessId, ProcessStatus};

use crate::manager::Shared;
use crate::ops::ProcessOps;
use crate::table::FinalStatus;

const MONITOR_THREAD_NAME: &str = "nsbox-monitor";

/// Handle to the background monitor thread.
///
/// Starting and stopping are idempotent. Dropping the handle stops the
/// thread and waits for it.
#[derive(Debug, Default)]
pub struct ProcessMonitor {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProcessMonitor {
    /// Creates a stopped monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts running `pass` every `interval`.
    ///
    /// Returns `Ok(false)` if the monitor was already running.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::Io`] if the thread cannot be spawned.
    pub fn start<F>(&mut self, interval: Duration, pass: F) -> Result<bool>
    where
        F: Fn() + Send + 'static,
    {
        if self.thread.is_some() {
            return Ok(false);
        }
        self.stop.store(false, Ordering::Release);
        let stop = Arc::clone(&self.stop);
        let thread = thread::Builder::new()
            .name(MONITOR_THREAD_NAME.into())
            .spawn(move || {
                tracing::debug!(?interval, "process monitor started");
                while !stop.load(Ordering::Acquire) {
                    pass();
                    thread::park_timeout(interval);
                }
                tracing::debug!("process monitor stopped");
            })
            .map_err(|e| NsboxError::Io {
                path: PathBuf::from(MONITOR_THREAD_NAME),
                source: e,
            })?;
        self.thread = Some(thread);
        Ok(true)
    }

    /// Signals the thread to stop and waits until it has returned.
    ///
    /// Returns `false` if the monitor was not running.
    pub fn stop(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return false;
        };
        self.stop.store(true, Ordering::Release);
        thread.thread().unpark();
        if thread.join().is_err() {
            tracing::error!("process monitor thread panicked");
        }
        true
    }

    /// Returns whether the thread is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Runs one monitor pass over every live process.
pub(crate) fn reconcile(shared: &Shared) {
    for pid in shared.table.ids() {
        let _ = refresh(shared, pid);
    }

    let finished = shared.table.take_unnotified();
    if !finished.is_empty() {
        let callback = shared.exit_callback();
        for record in &finished {
            tracing::info!(
                pid = %record.pid,
                status = %record.status,
                exit_code = ?record.exit_code,
                "process exited"
            );
            if let Some(callback) = &callback {
                if catch_unwind(AssertUnwindSafe(|| callback(record))).is_err() {
                    tracing::warn!(pid = %record.pid, "exit callback panicked");
                }
            }
        }
    }

    let swept = shared.table.sweep();
    if !swept.is_empty() {
        tracing::debug!(count = swept.len(), "swept finished processes");
    }
}

/// Brings the record of `pid` up to date and returns its status.
///
/// Returns `None` if `pid` was never registered or has left the history.
pub(crate) fn refresh(shared: &Shared, pid: ProcessId) -> Option<ProcessStatus> {
    let _status = shared.lock_status();
    let status = shared.table.status(pid)?;
    if status.is_terminal() {
        return Some(status);
    }
    let Some(outcome) = observe(shared.ops.as_ref(), pid) else {
        return Some(ProcessStatus::Running);
    };
    if shared.table.mark_finished(pid, outcome) {
        tracing::debug!(pid = %pid, status = %outcome.status, "process left running state");
    }
    shared.table.status(pid)
}

/// Checks a process; `None` means it is still running.
fn observe(ops: &dyn ProcessOps, pid: ProcessId) -> Option<FinalStatus> {
    if let Err(errno) = ops.send_signal(pid, None) {
        tracing::debug!(pid = %pid, %errno, "existence check failed, assuming gone");
        return Some(FinalStatus::unknown());
    }
    match ops.try_wait(pid) {
        Ok(Some(state)) => Some(state.into()),
        Ok(None) => None,
        Err(Errno::ECHILD) if ops.is_defunct(pid) => Some(FinalStatus::zombie()),
        Err(Errno::ECHILD) => None,
        Err(errno) => {
            tracing::debug!(pid = %pid, %errno, "status query failed, assuming gone");
            Some(FinalStatus::unknown())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut monitor = ProcessMonitor::new();
        let passes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&passes);

        assert!(monitor.start(Duration::from_millis(5), move || {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        }).unwrap());
        assert!(!monitor.start(Duration::from_millis(5), || {}).unwrap());
        assert!(monitor.is_running());

        thread::sleep(Duration::from_millis(50));
        assert!(monitor.stop());
        assert!(!monitor.stop());
        assert!(!monitor.is_running());

        let seen = passes.load(Ordering::SeqCst);
        assert!(seen > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(passes.load(Ordering::SeqCst), seen, "no pass after stop");
    }

    #[test]
    fn stop_wakes_a_long_interval() {
        let mut monitor = ProcessMonitor::new();
        assert!(monitor.start(Duration::from_secs(3600), || {}).unwrap());
        let started = std::time::Instant::now();
        assert!(monitor.stop());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn monitor_can_restart_after_stop() {
        let mut monitor = ProcessMonitor::new();
        assert!(monitor.start(Duration::from_millis(5), || {}).unwrap());
        assert!(monitor.stop());
        assert!(monitor.start(Duration::from_millis(5), || {}).unwrap());
        assert!(monitor.is_running());
    }
}
