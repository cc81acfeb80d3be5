//! Process manager that orchestrates the process lifecycle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use nix::sys::signal::Signal;
use nsbox_common::config::RuntimeConfig;
use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::{ProcessId, ProcessRecord, ProcessStatus};

use crate::monitor::{self, ProcessMonitor};
use crate::ops::{self, ProcessOps};
use crate::process::ProcessConfig;
use crate::table::ProcessTable;
use crate::termination;

/// Callback invoked once for every process that leaves `Running`.
pub type ExitCallback = Arc<dyn Fn(&ProcessRecord) + Send + Sync>;

/// State shared between caller threads and the monitor thread.
pub(crate) struct Shared {
    pub(crate) table: ProcessTable,
    pub(crate) ops: Box<dyn ProcessOps>,
    pub(crate) config: RuntimeConfig,
    /// Serializes status checks and signal delivery so that collecting an
    /// exit status and recording it happen as one step.
    status: Mutex<()>,
    callback: RwLock<Option<ExitCallback>>,
}

impl Shared {
    pub(crate) fn lock_status(&self) -> MutexGuard<'_, ()> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn exit_callback(&self) -> Option<ExitCallback> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_exit_callback(&self, callback: Option<ExitCallback>) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = callback;
    }
}

/// Launches, tracks, and terminates namespace-isolated processes.
///
/// Process creation is synchronous: [`create_process`](Self::create_process)
/// returns once the new program image is running. Status is reconciled by a
/// background monitor once [`start_monitoring`](Self::start_monitoring) has
/// been called, and on demand by the query and wait operations.
///
/// Dropping the manager stops the monitor. Processes it launched keep
/// running.
pub struct ProcessManager {
    shared: Arc<Shared>,
    monitor: ProcessMonitor,
}

impl ProcessManager {
    /// Creates a manager using the platform's process primitives.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_ops(config, ops::detect_ops())
    }

    /// Creates a manager using the given process primitives.
    #[must_use]
    pub fn with_ops(config: RuntimeConfig, ops: Box<dyn ProcessOps>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: ProcessTable::new(config.retired_capacity),
                ops,
                config,
                status: Mutex::new(()),
                callback: RwLock::new(None),
            }),
            monitor: ProcessMonitor::new(),
        }
    }

    /// Launches a process and registers it as `Running`.
    ///
    /// Must not be called from inside the exit callback.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::ProcessCreationFailed`] if the process could not
    /// be started, [`NsboxError::NamespaceNotFound`] if a namespace to join
    /// cannot be opened, or [`NsboxError::Config`] for an invalid config.
    pub fn create_process(&self, config: &ProcessConfig) -> Result<ProcessId> {
        let pid = self.shared.ops.spawn(config)?;
        let record = ProcessRecord::running(pid, config.command_line(), config.namespaces);
        tracing::info!(
            pid = %pid,
            command = %record.command_line,
            namespaces = %record.namespaces,
            "process started"
        );
        self.shared.table.insert(record);
        Ok(pid)
    }

    /// Sends `SIGTERM`, then `SIGKILL` if the process is still running after
    /// `timeout`.
    ///
    /// Returns `true` if the process stopped gracefully, `false` if it was
    /// killed.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::ProcessNotFound`] if `pid` is not managed, or
    /// [`NsboxError::ProcessStopFailed`] if a signal cannot be delivered.
    pub fn stop_process(&self, pid: ProcessId, timeout: Duration) -> Result<bool> {
        termination::stop(&self.shared, pid, timeout)
    }

    /// Sends `signal` to a managed process.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::ProcessNotFound`] if `pid` is not managed, or
    /// [`NsboxError::ProcessStopFailed`] if the process is already gone or
    /// delivery fails.
    pub fn kill_process(&self, pid: ProcessId, signal: Signal) -> Result<()> {
        termination::kill(&self.shared, pid, signal)
    }

    /// Blocks until the process is no longer running.
    ///
    /// `None` or a zero timeout waits indefinitely. Returns `false` if the
    /// timeout elapsed first.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::ProcessNotFound`] if `pid` is not managed.
    pub fn wait_for_process(&self, pid: ProcessId, timeout: Option<Duration>) -> Result<bool> {
        termination::wait(&self.shared, pid, timeout)
    }

    /// Returns whether `pid` is managed and still running.
    #[must_use]
    pub fn is_process_running(&self, pid: ProcessId) -> bool {
        monitor::refresh(&self.shared, pid) == Some(ProcessStatus::Running)
    }

    /// Returns a copy of the record for `pid`.
    ///
    /// Records of finished processes remain available for a while after
    /// the monitor has removed them from the live table.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::ProcessNotFound`] if `pid` is unknown.
    pub fn process_info(&self, pid: ProcessId) -> Result<ProcessRecord> {
        let _ = monitor::refresh(&self.shared, pid);
        self.shared
            .table
            .get(pid)
            .ok_or(NsboxError::ProcessNotFound { pid })
    }

    /// Returns the identifiers of every live managed process.
    #[must_use]
    pub fn managed_processes(&self) -> Vec<ProcessId> {
        self.shared.table.ids()
    }

    /// Registers the exit callback, replacing any previous one.
    ///
    /// The callback runs on the monitor thread, outside every internal
    /// lock. A panicking callback is logged and does not stop the monitor.
    pub fn set_exit_callback<F>(&self, callback: F)
    where
        F: Fn(&ProcessRecord) + Send + Sync + 'static,
    {
        self.shared.set_exit_callback(Some(Arc::new(callback)));
    }

    /// Removes the exit callback.
    pub fn clear_exit_callback(&self) {
        self.shared.set_exit_callback(None);
    }

    /// Starts the background monitor. Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor thread cannot be spawned.
    pub fn start_monitoring(&mut self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let started = self
            .monitor
            .start(self.shared.config.monitor_interval(), move || {
                monitor::reconcile(&shared);
            })?;
        if started {
            tracing::info!(
                interval_ms = self.shared.config.monitor_interval_ms,
                "process monitoring started"
            );
        }
        Ok(())
    }

    /// Stops the background monitor and waits for its thread to return.
    /// Does nothing if it is not running.
    pub fn stop_monitoring(&mut self) {
        if self.monitor.stop() {
            tracing::info!("process monitoring stopped");
        }
    }

    /// Returns whether the background monitor is running.
    #[must_use]
    pub const fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    /// Returns the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
