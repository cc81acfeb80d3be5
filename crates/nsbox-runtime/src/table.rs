//! Registry of managed processes.
//!
//! Every read and write goes through one mutex, held only for map lookups
//! and mutations. Records leave the live map once they are terminal and
//! their exit has been delivered; they then stay queryable in a bounded
//! history of retired records.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use nsbox_common::types::{ProcessId, ProcessRecord, ProcessStatus};

use crate::ops::ExitState;

/// Final classification applied when a process leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalStatus {
    /// Terminal status.
    pub status: ProcessStatus,
    /// Exit code, when it could be collected.
    pub exit_code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
}

impl FinalStatus {
    /// The identifier went stale before an exit status was seen.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: ProcessStatus::Unknown,
            exit_code: None,
            signal: None,
        }
    }

    /// The process is defunct and cannot be collected by this parent.
    #[must_use]
    pub const fn zombie() -> Self {
        Self {
            status: ProcessStatus::Zombie,
            exit_code: None,
            signal: None,
        }
    }
}

impl From<ExitState> for FinalStatus {
    fn from(state: ExitState) -> Self {
        Self {
            status: ProcessStatus::Stopped,
            exit_code: Some(state.exit_code()),
            signal: state.signal(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    record: ProcessRecord,
    notified: bool,
}

#[derive(Debug, Default)]
struct Inner {
    live: HashMap<ProcessId, Entry>,
    retired: VecDeque<ProcessRecord>,
}

/// Concurrent map from process identifier to [`ProcessRecord`].
#[derive(Debug)]
pub struct ProcessTable {
    inner: Mutex<Inner>,
    retired_capacity: usize,
}

impl ProcessTable {
    /// Creates an empty table keeping up to `retired_capacity` swept records.
    #[must_use]
    pub fn new(retired_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retired_capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a record, replacing any retired record for the same
    /// identifier.
    pub fn insert(&self, record: ProcessRecord) {
        let mut inner = self.lock();
        let pid = record.pid;
        inner.retired.retain(|r| r.pid != pid);
        let previous = inner.live.insert(
            pid,
            Entry {
                record,
                notified: false,
            },
        );
        if previous.is_some() {
            tracing::warn!(pid = %pid, "replaced a live record for a reused identifier");
        }
    }

    /// Returns a copy of the record for `pid`, live or retired.
    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<ProcessRecord> {
        let inner = self.lock();
        inner.live.get(&pid).map_or_else(
            || inner.retired.iter().rev().find(|r| r.pid == pid).cloned(),
            |entry| Some(entry.record.clone()),
        )
    }

    /// Returns the status of `pid`, live or retired.
    #[must_use]
    pub fn status(&self, pid: ProcessId) -> Option<ProcessStatus> {
        let inner = self.lock();
        inner.live.get(&pid).map_or_else(
            || inner.retired.iter().rev().find(|r| r.pid == pid).map(|r| r.status),
            |entry| Some(entry.record.status),
        )
    }

    /// Returns whether `pid` is in the live map.
    #[must_use]
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.lock().live.contains_key(&pid)
    }

    /// Returns the identifiers in the live map, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ProcessId> {
        let mut ids: Vec<_> = self.lock().live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    /// Returns whether the live map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().live.is_empty()
    }

    /// Moves a `Running` record to its final status.
    ///
    /// Returns `false`, changing nothing, if `pid` is not live or has
    /// already left `Running`.
    pub fn mark_finished(&self, pid: ProcessId, outcome: FinalStatus) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.live.get_mut(&pid) else {
            return false;
        };
        if !entry.record.is_running() {
            return false;
        }
        entry.record.status = outcome.status;
        entry.record.exit_code = outcome.exit_code;
        entry.record.signal = outcome.signal;
        entry.record.ended_at = Some(Utc::now());
        true
    }

    /// Returns copies of terminal records whose exit has not been delivered
    /// yet, marking them delivered.
    ///
    /// Each terminal record is returned by exactly one call.
    pub fn take_unnotified(&self) -> Vec<ProcessRecord> {
        let mut inner = self.lock();
        let mut finished: Vec<_> = inner
            .live
            .values_mut()
            .filter(|entry| !entry.notified && entry.record.status.is_terminal())
            .map(|entry| {
                entry.notified = true;
                entry.record.clone()
            })
            .collect();
        finished.sort_unstable_by_key(|r| r.pid);
        finished
    }

    /// Retires every terminal record whose exit has been delivered.
    ///
    /// Returns the retired identifiers.
    pub fn sweep(&self) -> Vec<ProcessId> {
        let mut inner = self.lock();
        let mut done: Vec<_> = inner
            .live
            .iter()
            .filter(|(_, entry)| entry.notified)
            .map(|(pid, entry)| (entry.record.ended_at, *pid))
            .collect();
        // Oldest exits enter the history first so they are evicted first.
        done.sort_unstable();
        let done: Vec<_> = done.into_iter().map(|(_, pid)| pid).collect();
        for pid in &done {
            if let Some(entry) = inner.live.remove(pid) {
                inner.retired.push_back(entry.record);
            }
        }
        while inner.retired.len() > self.retired_capacity {
            let _ = inner.retired.pop_front();
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use nsbox_common::types::NamespaceSet;

    use super::*;

    fn record(pid: i32) -> ProcessRecord {
        ProcessRecord::running(ProcessId::new(pid), "/bin/true".into(), NamespaceSet::empty())
    }

    #[test]
    fn insert_and_get() {
        let table = ProcessTable::new(4);
        table.insert(record(1));
        assert!(table.contains(ProcessId::new(1)));
        assert_eq!(table.status(ProcessId::new(1)), Some(ProcessStatus::Running));
        assert!(table.get(ProcessId::new(2)).is_none());
    }

    #[test]
    fn mark_finished_applies_only_once() {
        let table = ProcessTable::new(4);
        table.insert(record(1));
        assert!(table.mark_finished(ProcessId::new(1), ExitState::Exited(3).into()));
        assert!(!table.mark_finished(ProcessId::new(1), FinalStatus::unknown()));

        let rec = table.get(ProcessId::new(1)).unwrap();
        assert_eq!(rec.status, ProcessStatus::Stopped);
        assert_eq!(rec.exit_code, Some(3));
        assert!(rec.ended_at.is_some());
    }

    #[test]
    fn unnotified_records_are_taken_exactly_once() {
        let table = ProcessTable::new(4);
        table.insert(record(1));
        table.insert(record(2));
        let _ = table.mark_finished(ProcessId::new(2), FinalStatus::zombie());

        let first = table.take_unnotified();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].pid, ProcessId::new(2));
        assert!(table.take_unnotified().is_empty());
    }

    #[test]
    fn sweep_only_removes_delivered_records() {
        let table = ProcessTable::new(4);
        table.insert(record(1));
        let _ = table.mark_finished(ProcessId::new(1), ExitState::Exited(0).into());
        assert!(table.sweep().is_empty(), "undelivered record must stay live");

        let _ = table.take_unnotified();
        assert_eq!(table.sweep(), vec![ProcessId::new(1)]);
        assert!(table.is_empty());
        assert_eq!(
            table.get(ProcessId::new(1)).and_then(|r| r.exit_code),
            Some(0),
            "swept record stays queryable"
        );
    }

    #[test]
    fn retired_history_is_bounded() {
        let table = ProcessTable::new(2);
        for pid in 1..=3 {
            table.insert(record(pid));
            let _ = table.mark_finished(ProcessId::new(pid), ExitState::Exited(0).into());
        }
        let _ = table.take_unnotified();
        let _ = table.sweep();
        assert!(table.get(ProcessId::new(1)).is_none());
        assert!(table.get(ProcessId::new(3)).is_some());
    }

    #[test]
    fn retired_history_evicts_oldest_exits_first() {
        let table = ProcessTable::new(3);
        for pid in 1..=40 {
            table.insert(record(pid));
            let _ = table.mark_finished(ProcessId::new(pid), ExitState::Exited(pid).into());
        }
        let _ = table.take_unnotified();
        let swept = table.sweep();
        assert_eq!(swept.len(), 40);
        assert!(swept.windows(2).all(|w| w[0] < w[1]), "swept in exit order");

        for pid in 1..=37 {
            assert!(table.get(ProcessId::new(pid)).is_none(), "pid {pid} retained");
        }
        for pid in 38..=40 {
            assert_eq!(table.get(ProcessId::new(pid)).unwrap().exit_code, Some(pid));
        }
    }

    #[test]
    fn reinserting_recycled_pid_evicts_retired_record() {
        let table = ProcessTable::new(4);
        table.insert(record(1));
        let _ = table.mark_finished(ProcessId::new(1), ExitState::Exited(9).into());
        let _ = table.take_unnotified();
        let _ = table.sweep();

        table.insert(record(1));
        let rec = table.get(ProcessId::new(1)).unwrap();
        assert!(rec.is_running());
        assert_eq!(table.len(), 1);
    }
}
