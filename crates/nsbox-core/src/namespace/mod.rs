//! Linux namespace management for process isolation.
//!
//! A [`NamespaceHandle`] owns exactly one namespace membership: either a
//! namespace freshly created for the calling context with `unshare(2)`, or
//! a descriptor opened on another process's `/proc/<pid>/ns/<kind>` entry
//! for the purpose of joining it with `setns(2)`.

pub mod user;
pub mod uts;

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sched::{CloneFlags, setns, unshare};
use nsbox_common::constants::PROC_ROOT;
use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::{NamespaceKind, ProcessId};

/// Returns the `unshare(2)`/`setns(2)` flag for a namespace kind.
#[must_use]
pub const fn clone_flag(kind: NamespaceKind) -> CloneFlags {
    match kind {
        NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceKind::Network => CloneFlags::CLONE_NEWNET,
        NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
        NamespaceKind::Cgroup => CloneFlags::CLONE_NEWCGROUP,
    }
}

/// Returns the procfs entry published for `pid`'s namespace of `kind`.
#[must_use]
pub fn ns_path(pid: ProcessId, kind: NamespaceKind) -> PathBuf {
    PathBuf::from(PROC_ROOT)
        .join(pid.to_string())
        .join("ns")
        .join(kind.proc_name())
}

/// Resolves a namespace name (`net`, `mount`, ...) to its procfs entry.
///
/// # Errors
///
/// Returns [`NsboxError::UnknownNamespace`] if the name matches no kind.
pub fn ns_path_by_name(pid: ProcessId, name: &str) -> Result<PathBuf> {
    let kind: NamespaceKind = name.parse()?;
    Ok(ns_path(pid, kind))
}

/// Returns the kernel's identity string for a namespace, e.g. `net:[4026531840]`.
///
/// Two processes share a namespace exactly when these strings are equal.
///
/// # Errors
///
/// Returns [`NsboxError::NamespaceNotFound`] if the entry cannot be read.
pub fn namespace_id(pid: ProcessId, kind: NamespaceKind) -> Result<String> {
    let path = ns_path(pid, kind);
    let target = std::fs::read_link(&path).map_err(|e| NsboxError::NamespaceNotFound {
        kind,
        path: path.clone(),
        source: e,
    })?;
    Ok(target.to_string_lossy().into_owned())
}

/// Exclusive owner of one namespace membership.
///
/// The handle cannot be cloned. Dropping it closes the descriptor it
/// holds, if any. [`NamespaceHandle::take`] moves the resource into a new
/// handle and leaves this one invalid; an invalid handle only answers
/// [`kind`](Self::kind) and releases nothing.
#[derive(Debug)]
pub struct NamespaceHandle {
    kind: NamespaceKind,
    target: ProcessId,
    fd: Option<OwnedFd>,
    valid: bool,
}

impl NamespaceHandle {
    /// Moves the calling context into a new namespace of `kind`.
    ///
    /// The membership applies to the caller itself, so the handle holds
    /// no descriptor. Fork-safe.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::NamespaceCreationFailed`] if `unshare(2)` fails,
    /// typically with `EPERM` when the caller lacks privilege.
    pub fn create(kind: NamespaceKind) -> Result<Self> {
        unshare(clone_flag(kind)).map_err(|e| NsboxError::NamespaceCreationFailed {
            kind,
            source: e.into(),
        })?;
        Ok(Self {
            kind,
            target: current_pid(),
            fd: None,
            valid: true,
        })
    }

    /// Opens the namespace entry of another process for joining.
    ///
    /// The descriptor is opened close-on-exec.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::NamespaceNotFound`] if the entry cannot be
    /// opened: the process is gone, the kernel lacks the namespace kind, or
    /// permission is denied.
    pub fn open_for(pid: ProcessId, kind: NamespaceKind) -> Result<Self> {
        let path = ns_path(pid, kind);
        let file = File::open(&path).map_err(|e| NsboxError::NamespaceNotFound {
            kind,
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(pid = %pid, kind = %kind, path = %path.display(), "opened namespace entry");
        Ok(Self {
            kind,
            target: pid,
            fd: Some(OwnedFd::from(file)),
            valid: true,
        })
    }

    /// Moves the calling thread into `pid`'s namespace of `kind`.
    ///
    /// The entry descriptor is released on every path, including failure.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::NamespaceNotFound`] if the entry cannot be
    /// opened, or [`NsboxError::NamespaceJoinFailed`] if `setns(2)` fails.
    pub fn join(pid: ProcessId, kind: NamespaceKind) -> Result<()> {
        let handle = Self::open_for(pid, kind)?;
        handle.enter()?;
        tracing::debug!(pid = %pid, kind = %kind, "joined namespace");
        Ok(())
    }

    /// Moves the calling thread into the namespace this handle refers to.
    ///
    /// A handle obtained from [`create`](Self::create) already describes the
    /// caller's membership, so entering it is a no-op. Fork-safe.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::NamespaceJoinFailed`] if `setns(2)` fails or
    /// the handle was invalidated by [`take`](Self::take).
    pub fn enter(&self) -> Result<()> {
        if !self.valid {
            return Err(self.join_error(Errno::EBADF));
        }
        match &self.fd {
            Some(fd) => setns(fd, clone_flag(self.kind)).map_err(|e| self.join_error(e)),
            None => Ok(()),
        }
    }

    /// Transfers the owned resource into a new handle.
    ///
    /// Afterwards `self` is invalid and its drop releases nothing.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            kind: self.kind,
            target: self.target,
            fd: self.fd.take(),
            valid: std::mem::replace(&mut self.valid, false),
        }
    }

    /// Returns the namespace kind.
    #[must_use]
    pub const fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Returns the process whose namespace this handle refers to.
    #[must_use]
    pub const fn target(&self) -> ProcessId {
        self.target
    }

    /// Returns whether this handle still owns its membership.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the entry descriptor, for handles created by [`open_for`](Self::open_for).
    #[must_use]
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd)
    }

    fn join_error(&self, errno: Errno) -> NsboxError {
        NsboxError::NamespaceJoinFailed {
            kind: self.kind,
            pid: self.target,
            source: errno.into(),
        }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn current_pid() -> ProcessId {
    ProcessId::new(std::process::id() as i32)
}
