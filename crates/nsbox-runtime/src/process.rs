//! Process configuration.
//!
//! A [`ProcessConfig`] describes what to run and which namespaces to
//! isolate it into. It is only read by the launcher.

use std::path::PathBuf;

use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::{NamespaceKind, NamespaceSet, ProcessId};
use nsbox_core::namespace::user::IdMapping;
use nsbox_core::namespace::uts;

/// Configuration of a process to launch.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Path of the executable. No `PATH` lookup is performed.
    pub executable: PathBuf,
    /// Arguments after `argv[0]`, which is always the executable path.
    pub args: Vec<String>,
    /// Complete environment of the new process.
    pub env: Vec<(String, String)>,
    /// Directory to change into before `execve`.
    pub working_dir: Option<PathBuf>,
    /// Hostname applied inside the new UTS namespace.
    pub hostname: Option<String>,
    /// Namespaces created for the process.
    pub namespaces: NamespaceSet,
    /// Existing namespaces joined before any new one is created.
    pub join: Vec<(ProcessId, NamespaceKind)>,
    /// UID map written after the user namespace is created.
    pub uid_map: Option<IdMapping>,
    /// GID map written after the user namespace is created.
    pub gid_map: Option<IdMapping>,
}

impl ProcessConfig {
    /// Creates a configuration running `executable` with no arguments,
    /// an empty environment, and no isolation.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Copies the calling process's environment into the configuration.
    #[must_use]
    pub fn inherit_env(mut self) -> Self {
        self.env.extend(std::env::vars());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the hostname. Only applied when a UTS namespace is requested.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Requests a new namespace of `kind`.
    #[must_use]
    pub const fn namespace(mut self, kind: NamespaceKind) -> Self {
        self.namespaces = self.namespaces.with(kind);
        self
    }

    /// Requests every namespace in `set`.
    #[must_use]
    pub fn namespaces(mut self, set: NamespaceSet) -> Self {
        self.namespaces = self.namespaces.iter().chain(set.iter()).collect();
        self
    }

    /// Joins `pid`'s namespace of `kind` before launch.
    #[must_use]
    pub fn join_namespace(mut self, pid: ProcessId, kind: NamespaceKind) -> Self {
        self.join.push((pid, kind));
        self
    }

    /// Sets the UID map for the user namespace.
    #[must_use]
    pub const fn uid_map(mut self, mapping: IdMapping) -> Self {
        self.uid_map = Some(mapping);
        self
    }

    /// Sets the GID map for the user namespace.
    #[must_use]
    pub const fn gid_map(mut self, mapping: IdMapping) -> Self {
        self.gid_map = Some(mapping);
        self
    }

    /// Reconstructs the command line for display and records.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Checks the configuration before anything is forked.
    ///
    /// # Errors
    ///
    /// Returns [`NsboxError::Config`] if the executable is empty, an
    /// environment key is empty or contains `=`, the hostname is invalid,
    /// or ID maps are given without a user namespace.
    pub fn validate(&self) -> Result<()> {
        if self.executable.as_os_str().is_empty() {
            return Err(NsboxError::Config {
                message: "executable path is empty".into(),
            });
        }
        if let Some((key, _)) = self
            .env
            .iter()
            .find(|(key, _)| key.is_empty() || key.contains('='))
        {
            return Err(NsboxError::Config {
                message: format!("invalid environment variable name {key:?}"),
            });
        }
        if let Some(hostname) = &self.hostname {
            uts::validate_hostname(hostname)?;
        }
        if (self.uid_map.is_some() || self.gid_map.is_some())
            && !self.namespaces.contains(NamespaceKind::User)
        {
            return Err(NsboxError::Config {
                message: "uid/gid maps require a user namespace".into(),
            });
        }
        Ok(())
    }
}
