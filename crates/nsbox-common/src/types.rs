//! Domain primitive types used across the nsbox workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NsboxError;

/// Operating-system process identifier of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Wraps a raw process identifier.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl From<i32> for ProcessId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One isolable kernel namespace category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Process ID numbering.
    Pid,
    /// Network stack (interfaces, routes, sockets).
    Network,
    /// Mount table.
    Mount,
    /// Hostname and NIS domain name.
    Uts,
    /// System V IPC objects and POSIX message queues.
    Ipc,
    /// User and group ID mappings.
    User,
    /// Cgroup root view.
    Cgroup,
}

impl NamespaceKind {
    /// Every kind, in the order a child creates them.
    ///
    /// User comes first so that the remaining unshares run with the
    /// capabilities granted inside the new user namespace.
    pub const ALL: [Self; 7] = [
        Self::User,
        Self::Mount,
        Self::Uts,
        Self::Ipc,
        Self::Network,
        Self::Cgroup,
        Self::Pid,
    ];

    /// Returns the entry name the kernel publishes under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Pid => "pid",
            Self::Network => "net",
            Self::Mount => "mnt",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Pid => 1,
            Self::Network => 1 << 1,
            Self::Mount => 1 << 2,
            Self::Uts => 1 << 3,
            Self::Ipc => 1 << 4,
            Self::User => 1 << 5,
            Self::Cgroup => 1 << 6,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pid => write!(f, "pid"),
            Self::Network => write!(f, "network"),
            Self::Mount => write!(f, "mount"),
            Self::Uts => write!(f, "uts"),
            Self::Ipc => write!(f, "ipc"),
            Self::User => write!(f, "user"),
            Self::Cgroup => write!(f, "cgroup"),
        }
    }
}

impl FromStr for NamespaceKind {
    type Err = NsboxError;

    /// Parses either the procfs entry name (`net`, `mnt`) or the long name
    /// (`network`, `mount`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pid" => Ok(Self::Pid),
            "net" | "network" => Ok(Self::Network),
            "mnt" | "mount" => Ok(Self::Mount),
            "uts" | "hostname" => Ok(Self::Uts),
            "ipc" => Ok(Self::Ipc),
            "user" => Ok(Self::User),
            "cgroup" => Ok(Self::Cgroup),
            _ => Err(NsboxError::UnknownNamespace { name: s.to_string() }),
        }
    }
}

/// A set of namespace kinds, iterated in creation order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<NamespaceKind>", into = "Vec<NamespaceKind>")]
pub struct NamespaceSet(u8);

impl NamespaceSet {
    /// Returns an empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns a set holding every kind.
    #[must_use]
    pub fn all() -> Self {
        NamespaceKind::ALL.into_iter().collect()
    }

    /// Returns this set with `kind` added.
    #[must_use]
    pub const fn with(self, kind: NamespaceKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Adds `kind` to the set.
    pub const fn insert(&mut self, kind: NamespaceKind) {
        self.0 |= kind.bit();
    }

    /// Returns whether `kind` is in the set.
    #[must_use]
    pub const fn contains(self, kind: NamespaceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Returns the number of kinds in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the kinds in creation order.
    pub fn iter(self) -> impl Iterator<Item = NamespaceKind> {
        NamespaceKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<NamespaceKind> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = NamespaceKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<NamespaceKind>> for NamespaceSet {
    fn from(kinds: Vec<NamespaceKind>) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<NamespaceSet> for Vec<NamespaceKind> {
    fn from(set: NamespaceSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        for (i, kind) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", kind.proc_name())?;
        }
        Ok(())
    }
}

/// Lifecycle status of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// The process is alive.
    Running,
    /// The process exited or was killed and its status was collected.
    Stopped,
    /// The process is defunct but its status could not be collected here.
    Zombie,
    /// The identifier no longer refers to a live process.
    Unknown,
}

impl ProcessStatus {
    /// Returns whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Zombie => write!(f, "zombie"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata tracked for one managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Process identifier.
    pub pid: ProcessId,
    /// Current status.
    pub status: ProcessStatus,
    /// Exit code, set once the status leaves `Running` and is known.
    pub exit_code: Option<i32>,
    /// Terminating signal number, if the process was killed by one.
    pub signal: Option<i32>,
    /// When the process was registered.
    pub started_at: DateTime<Utc>,
    /// When the process was observed to leave `Running`.
    pub ended_at: Option<DateTime<Utc>>,
    /// Reconstructed command line.
    pub command_line: String,
    /// Namespace kinds requested for this process.
    pub namespaces: NamespaceSet,
}

impl ProcessRecord {
    /// Creates a record for a freshly started process.
    #[must_use]
    pub fn running(pid: ProcessId, command_line: String, namespaces: NamespaceSet) -> Self {
        Self {
            pid,
            status: ProcessStatus::Running,
            exit_code: None,
            signal: None,
            started_at: Utc::now(),
            ended_at: None,
            command_line,
            namespaces,
        }
    }

    /// Returns whether the record is still `Running`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, ProcessStatus::Running)
    }
}
