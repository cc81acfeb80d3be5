//! Unified error types for the nsbox workspace.
//!
//! Every variant that originates in a failed system call carries the
//! underlying [`std::io::Error`], so both the OS error text and the raw
//! errno survive propagation.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{NamespaceKind, ProcessId};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NsboxError {
    /// Requesting a new namespace for the calling context failed.
    #[error("failed to create {kind} namespace: {source}")]
    NamespaceCreationFailed {
        /// Namespace kind that was requested.
        kind: NamespaceKind,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Joining another process's namespace failed.
    #[error("failed to join {kind} namespace of process {pid}: {source}")]
    NamespaceJoinFailed {
        /// Namespace kind being joined.
        kind: NamespaceKind,
        /// Process whose namespace was targeted.
        pid: ProcessId,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A namespace entry could not be opened.
    #[error("{kind} namespace entry not found at {path}: {source}")]
    NamespaceNotFound {
        /// Namespace kind being looked up.
        kind: NamespaceKind,
        /// Path of the procfs entry.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A namespace name did not map to any known kind.
    #[error("unknown namespace kind: {name}")]
    UnknownNamespace {
        /// The unrecognized name.
        name: String,
    },

    /// A process could not be created or failed before its program started.
    #[error("failed to create process `{command}`: {source}")]
    ProcessCreationFailed {
        /// Reconstructed command line of the process.
        command: String,
        /// OS error reported by the fork, the child setup, or `execve`.
        source: std::io::Error,
    },

    /// The identifier is not tracked by the process table.
    #[error("process {pid} is not managed")]
    ProcessNotFound {
        /// Identifier that was looked up.
        pid: ProcessId,
    },

    /// Delivering a signal to a tracked process failed.
    #[error("failed to signal process {pid}: {source}")]
    ProcessStopFailed {
        /// Target process.
        pid: ProcessId,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl NsboxError {
    /// Returns the raw OS error number carried by this error, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::NamespaceCreationFailed { source, .. }
            | Self::NamespaceJoinFailed { source, .. }
            | Self::NamespaceNotFound { source, .. }
            | Self::ProcessCreationFailed { source, .. }
            | Self::ProcessStopFailed { source, .. }
            | Self::Io { source, .. } => source.raw_os_error(),
            Self::UnknownNamespace { .. }
            | Self::ProcessNotFound { .. }
            | Self::Config { .. }
            | Self::Serialization { .. } => None,
        }
    }

    /// Returns whether this error reports a missing namespace entry or kind.
    #[must_use]
    pub const fn is_namespace_not_found(&self) -> bool {
        matches!(
            self,
            Self::NamespaceNotFound { .. } | Self::UnknownNamespace { .. }
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NsboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_os_error_is_exposed_for_os_variants() {
        let err = NsboxError::ProcessCreationFailed {
            command: "/nope".into(),
            source: std::io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert!(err.to_string().contains("/nope"));
    }

    #[test]
    fn raw_os_error_is_absent_for_lookup_failures() {
        let err = NsboxError::ProcessNotFound {
            pid: ProcessId::new(42),
        };
        assert_eq!(err.raw_os_error(), None);
        assert_eq!(err.to_string(), "process 42 is not managed");
    }

    #[test]
    fn unknown_namespace_counts_as_not_found() {
        let err = NsboxError::UnknownNamespace {
            name: "time".into(),
        };
        assert!(err.is_namespace_not_found());
    }
}
