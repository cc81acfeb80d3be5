//! Formatted output helpers for CLI commands.
//!
//! Provides one-line process summaries and human-readable durations.

use std::time::Duration;

use nsbox_common::types::{ProcessRecord, ProcessStatus};
use nsbox_runtime::Signal;

/// Formats a duration compactly (e.g., "350ms", "2.5s", "3m 07s").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Returns the conventional name of a signal number, or the number itself.
#[must_use]
pub fn signal_name(signo: i32) -> String {
    Signal::try_from(signo).map_or_else(|_| signo.to_string(), |s| s.as_str().to_string())
}

/// Describes how a process ended, in one line.
#[must_use]
pub fn summarize(record: &ProcessRecord) -> String {
    let outcome = match (record.status, record.signal, record.exit_code) {
        (ProcessStatus::Running, ..) => "still running".to_string(),
        (ProcessStatus::Stopped, Some(signo), _) => format!("killed by {}", signal_name(signo)),
        (ProcessStatus::Stopped, None, Some(code)) => format!("exited with code {code}"),
        (ProcessStatus::Stopped, None, None) => "stopped".to_string(),
        (ProcessStatus::Zombie, ..) => "became a zombie".to_string(),
        (ProcessStatus::Unknown, ..) => "ended with unknown status".to_string(),
    };
    let elapsed = record
        .ended_at
        .and_then(|end| (end - record.started_at).to_std().ok())
        .map(|d| format!(" after {}", format_duration(d)))
        .unwrap_or_default();
    format!(
        "process {} ({}) {outcome}{elapsed} [namespaces: {}]",
        record.pid, record.command_line, record.namespaces
    )
}
