//! Process spawning inside isolated namespaces.
//!
//! Forks a child that enters the configured namespaces and replaces its
//! image with the target program. A close-on-exec status pipe carries the
//! outcome back: the child writes its errno if any step fails, and a
//! successful `execve` closes the write end, so the parent reads EOF.
//!
//! Everything the child needs is prepared before `fork(2)`. Between fork
//! and exec the child performs no allocation and no logging, since another
//! thread of the parent may hold the allocator or subscriber locks at the
//! moment of the fork.

use std::ffi::{CString, c_char};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;

use nix::fcntl::OFlag;
use nix::sys::signal::{SigHandler, Signal, kill, signal};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, fork, pipe2};
use nsbox_common::constants::CHILD_SETUP_FAILURE_EXIT;
use nsbox_common::error::{NsboxError, Result};
use nsbox_common::types::{NamespaceKind, NamespaceSet, ProcessId};
use nsbox_core::namespace::NamespaceHandle;
use nsbox_core::namespace::user::IdMapWriter;
use nsbox_core::namespace::uts;

use crate::process::ProcessConfig;

/// Size of the errno report written by a failing child.
const STATUS_LEN: usize = std::mem::size_of::<i32>();

/// Launches `config` and returns once the new program is running.
///
/// # Errors
///
/// Returns [`NsboxError::Config`] for an invalid configuration,
/// [`NsboxError::NamespaceNotFound`] if a namespace to join cannot be
/// opened, and [`NsboxError::ProcessCreationFailed`] if the fork fails or
/// the child reports a failure before or during `execve`.
pub fn spawn_isolated(config: &ProcessConfig) -> Result<ProcessId> {
    config.validate()?;
    let command = config.command_line();
    let plan = ExecPlan::prepare(config, &command)?;

    let (read_end, write_end) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| creation_error(&command, e.into()))?;

    // SAFETY: the child branch only runs `ExecPlan::run`, which uses
    // pre-allocated buffers and async-signal-safe calls before `execve`
    // or `_exit`.
    match unsafe { fork() } {
        Err(e) => Err(creation_error(&command, e.into())),
        Ok(ForkResult::Child) => {
            drop(read_end);
            plan.run(write_end)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(write_end);
            drop(plan);
            await_exec(child, read_end, &command)
        }
    }
}

/// Waits for the child's verdict on the status pipe.
fn await_exec(child: Pid, read_end: OwnedFd, command: &str) -> Result<ProcessId> {
    let mut pipe = File::from(read_end);
    let mut report = [0_u8; STATUS_LEN];
    let mut filled = 0;

    while filled < STATUS_LEN {
        match pipe.read(&mut report[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                abandon(child);
                return Err(creation_error(command, e));
            }
        }
    }

    match filled {
        0 => {
            tracing::debug!(pid = child.as_raw(), command, "execve succeeded");
            Ok(ProcessId::new(child.as_raw()))
        }
        STATUS_LEN => {
            reap(child);
            let errno = i32::from_ne_bytes(report);
            Err(creation_error(command, std::io::Error::from_raw_os_error(errno)))
        }
        _ => {
            reap(child);
            Err(creation_error(
                command,
                std::io::Error::new(ErrorKind::UnexpectedEof, "truncated child status report"),
            ))
        }
    }
}

/// Collects a child that reported failure and is exiting.
fn reap(child: Pid) {
    loop {
        match waitpid(child, None) {
            Err(nix::errno::Errno::EINTR) => {}
            Ok(_) | Err(_) => return,
        }
    }
}

/// Kills and collects a child whose outcome could not be determined.
fn abandon(child: Pid) {
    let _ = kill(child, Signal::SIGKILL);
    reap(child);
}

fn creation_error(command: &str, source: std::io::Error) -> NsboxError {
    NsboxError::ProcessCreationFailed {
        command: command.to_string(),
        source,
    }
}

/// Everything the child needs, rendered before the fork.
struct ExecPlan {
    path: CString,
    // Owners of the strings `argv` and `envp` point into.
    _args: Vec<CString>,
    _vars: Vec<CString>,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
    namespaces: NamespaceSet,
    joins: Vec<NamespaceHandle>,
    id_maps: IdMapWriter,
    hostname: Option<String>,
    working_dir: Option<CString>,
}

impl ExecPlan {
    fn prepare(config: &ProcessConfig, command: &str) -> Result<Self> {
        let nul_error = |what: &str| {
            creation_error(
                command,
                std::io::Error::new(ErrorKind::InvalidInput, format!("{what} contains a NUL byte")),
            )
        };

        let path = CString::new(config.executable.as_os_str().as_bytes())
            .map_err(|_| nul_error("executable path"))?;

        let mut args = Vec::with_capacity(config.args.len() + 1);
        args.push(path.clone());
        for arg in &config.args {
            args.push(CString::new(arg.as_bytes()).map_err(|_| nul_error("argument"))?);
        }

        let vars = config
            .env
            .iter()
            .map(|(key, value)| CString::new(format!("{key}={value}")))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| nul_error("environment variable"))?;

        let working_dir = config
            .working_dir
            .as_ref()
            .map(|dir| CString::new(dir.as_os_str().as_bytes()))
            .transpose()
            .map_err(|_| nul_error("working directory"))?;

        let joins = config
            .join
            .iter()
            .map(|&(pid, kind)| NamespaceHandle::open_for(pid, kind))
            .collect::<Result<Vec<_>>>()?;

        let hostname = match &config.hostname {
            Some(name) if config.namespaces.contains(NamespaceKind::Uts) => Some(name.clone()),
            Some(name) => {
                tracing::warn!(hostname = %name, "hostname ignored without a UTS namespace");
                None
            }
            None => None,
        };

        Ok(Self {
            argv: null_terminated(&args),
            envp: null_terminated(&vars),
            path,
            _args: args,
            _vars: vars,
            namespaces: config.namespaces,
            joins,
            id_maps: IdMapWriter::new(config.uid_map, config.gid_map),
            hostname,
            working_dir,
        })
    }

    /// Child side: sets up isolation and replaces the program image.
    fn run(&self, status: OwnedFd) -> ! {
        let error = match self.isolate() {
            Ok(()) => {
                // SAFETY: `path`, `argv` and `envp` are NUL-terminated C
                // strings and NULL-terminated pointer arrays owned by `self`.
                let _ = unsafe {
                    libc::execve(self.path.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr())
                };
                std::io::Error::last_os_error()
            }
            Err(e) => e,
        };
        report_failure(status, &error)
    }

    fn isolate(&self) -> std::io::Result<()> {
        // Ignored dispositions survive execve, and the Rust runtime ignores
        // SIGPIPE in the parent.
        // SAFETY: restoring the default disposition installs no handler.
        let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }?;
        for handle in &self.joins {
            handle.enter().map_err(os_error)?;
        }
        for kind in self.namespaces.iter() {
            let _membership = NamespaceHandle::create(kind).map_err(os_error)?;
            if kind == NamespaceKind::User && !self.id_maps.is_empty() {
                self.id_maps.apply()?;
            }
        }
        if let Some(hostname) = &self.hostname {
            uts::set_hostname(hostname)?;
        }
        if let Some(dir) = &self.working_dir {
            nix::unistd::chdir(dir.as_c_str())?;
        }
        Ok(())
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn os_error(err: NsboxError) -> std::io::Error {
    std::io::Error::from_raw_os_error(err.raw_os_error().unwrap_or(libc::EINVAL))
}

/// Writes the errno to the status pipe and terminates the child.
fn report_failure(status: OwnedFd, error: &std::io::Error) -> ! {
    let errno = error.raw_os_error().unwrap_or(libc::EIO);
    let mut pipe = File::from(status);
    let _ = pipe.write_all(&errno.to_ne_bytes());
    // SAFETY: `_exit` skips atexit handlers and destructors that belong to
    // the parent's copy of the address space.
    unsafe { libc::_exit(CHILD_SETUP_FAILURE_EXIT) }
}
