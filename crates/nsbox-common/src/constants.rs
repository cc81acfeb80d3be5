//! System-wide constants and well-known paths.

/// Root of the procfs mount used to locate per-process namespace entries.
pub const PROC_ROOT: &str = "/proc";

/// Exit status used by a forked child that failed before `execve` took over.
///
/// The parent never relies on this value to detect failure (the status
/// pipe is authoritative); it only keeps the failed child distinguishable
/// in external tooling.
pub const CHILD_SETUP_FAILURE_EXIT: i32 = 127;

/// Offset added to a signal number to form the shell-style exit code of a
/// signal-terminated process.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Default interval between two monitor passes, in milliseconds.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 100;

/// Default polling interval used by stop and wait operations, in milliseconds.
pub const DEFAULT_STOP_POLL_INTERVAL_MS: u64 = 100;

/// Default number of swept process records kept for late queries.
pub const DEFAULT_RETIRED_CAPACITY: usize = 64;

/// Application name used in log output.
pub const APP_NAME: &str = "nsbox";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "nsbox";
