//! Graceful-then-forced termination and bounded waits.
//!
//! Signals are only delivered to identifiers whose record is still
//! `Running`, while holding the status lock, so a pid that has already been
//! collected (and may have been recycled by the kernel) is never signalled.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::{ProcessId, ProcessStatus};

use crate::manager::Shared;
use crate::monitor::refresh;

/// How long a forced stop keeps collecting the killed process before returning.
const KILL_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of a guarded signal delivery.
enum Delivery {
    Sent,
    AlreadyGone,
}

/// Asks `pid` to terminate, escalating to `SIGKILL` after `timeout`.
///
/// Returns `true` if the process ended on its own within the timeout and
/// `false` if it had to be killed.
pub(crate) fn stop(shared: &Shared, pid: ProcessId, timeout: Duration) -> Result<bool> {
    if shared.table.status(pid).is_none() {
        return Err(NsboxError::ProcessNotFound { pid });
    }
    if let Delivery::AlreadyGone = deliver(shared, pid, Signal::SIGTERM)? {
        return Ok(true);
    }
    tracing::info!(pid = %pid, ?timeout, "sent SIGTERM");

    if poll_until_exit(shared, pid, Some(timeout)) {
        tracing::info!(pid = %pid, "process stopped gracefully");
        return Ok(true);
    }

    tracing::warn!(pid = %pid, ?timeout, "graceful stop timed out, sending SIGKILL");
    if let Delivery::Sent = deliver(shared, pid, Signal::SIGKILL)? {
        let _ = poll_until_exit(shared, pid, Some(KILL_SETTLE_TIMEOUT));
    }
    Ok(false)
}

/// Sends `signal` to a managed process.
pub(crate) fn kill(shared: &Shared, pid: ProcessId, signal: Signal) -> Result<()> {
    if shared.table.status(pid).is_none() {
        return Err(NsboxError::ProcessNotFound { pid });
    }
    match deliver(shared, pid, signal)? {
        Delivery::Sent => {
            tracing::info!(pid = %pid, %signal, "signal delivered");
            Ok(())
        }
        Delivery::AlreadyGone => Err(NsboxError::ProcessStopFailed {
            pid,
            source: Errno::ESRCH.into(),
        }),
    }
}

/// Waits until `pid` is no longer running.
///
/// `None` or a zero timeout waits indefinitely. Returns `false` on timeout.
pub(crate) fn wait(shared: &Shared, pid: ProcessId, timeout: Option<Duration>) -> Result<bool> {
    if shared.table.status(pid).is_none() {
        return Err(NsboxError::ProcessNotFound { pid });
    }
    let timeout = timeout.filter(|t| !t.is_zero());
    Ok(poll_until_exit(shared, pid, timeout))
}

/// Delivers `signal` unless the process has already left `Running`.
fn deliver(shared: &Shared, pid: ProcessId, signal: Signal) -> Result<Delivery> {
    let _status = shared.lock_status();
    if shared.table.status(pid) != Some(ProcessStatus::Running) {
        return Ok(Delivery::AlreadyGone);
    }
    match shared.ops.send_signal(pid, Some(signal)) {
        Ok(()) => Ok(Delivery::Sent),
        Err(Errno::ESRCH) => Ok(Delivery::AlreadyGone),
        Err(errno) => Err(NsboxError::ProcessStopFailed {
            pid,
            source: errno.into(),
        }),
    }
}

/// Polls the process status until it leaves `Running` or the timeout elapses.
fn poll_until_exit(shared: &Shared, pid: ProcessId, timeout: Option<Duration>) -> bool {
    let deadline = timeout.map(|t| Instant::now() + t);
    let interval = shared.config.stop_poll_interval();
    loop {
        if refresh(shared, pid) != Some(ProcessStatus::Running) {
            return true;
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                interval.min(deadline - now)
            }
            None => interval,
        };
        std::thread::sleep(pause);
    }
}
