//! `nsbox run`: launch a command in new namespaces and wait for it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use nsbox_common::config::RuntimeConfig;
use nsbox_common::types::{NamespaceKind, ProcessId, ProcessRecord};
use nsbox_core::namespace::user::IdMapping;
use nsbox_runtime::manager::ProcessManager;
use nsbox_runtime::process::ProcessConfig;

use crate::output;

/// Grace period between `SIGTERM` and `SIGKILL` when the CLI stops a process.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Slice the supervisor waits before rechecking for Ctrl+C or the deadline.
const WAIT_SLICE: Duration = Duration::from_millis(250);

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Namespaces to create (pid, net, mnt, uts, ipc, user, cgroup).
    #[arg(long, value_delimiter = ',')]
    pub ns: Vec<NamespaceKind>,

    /// Hostname inside the new UTS namespace.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Working directory of the command.
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Extra environment variable (KEY=VALUE). May be repeated.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// UID mapping for the user namespace (inside:outside:count).
    #[arg(long)]
    pub uid_map: Option<IdMapping>,

    /// GID mapping for the user namespace (inside:outside:count).
    #[arg(long)]
    pub gid_map: Option<IdMapping>,

    /// Stop the command after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the final process record as JSON.
    #[arg(long)]
    pub json: bool,

    /// Command and its arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// The exit status mirrors the command's exit code.
///
/// # Errors
///
/// Returns an error if the command cannot be resolved or launched.
pub fn execute(args: RunArgs, config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    let mut process = command_config(&args.command)?
        .namespaces(args.ns.iter().copied().collect())
        .inherit_env();
    process.env = merge_env(std::mem::take(&mut process.env), parse_env(&args.env)?);
    if let Some(dir) = args.workdir {
        process = process.working_dir(dir);
    }
    if let Some(hostname) = args.hostname {
        process = process.hostname(hostname);
    }
    if let Some(mapping) = args.uid_map {
        process = process.uid_map(mapping);
    }
    if let Some(mapping) = args.gid_map {
        process = process.gid_map(mapping);
    }

    let timeout = args.timeout.map(Duration::from_secs);
    supervise(&process, config, timeout, args.json)
}

/// Builds a configuration for `command`, resolving a bare program name
/// through `PATH`.
pub(crate) fn command_config(command: &[String]) -> anyhow::Result<ProcessConfig> {
    let (program, rest) = command.split_first().context("no command given")?;
    let executable = if program.contains('/') {
        PathBuf::from(program)
    } else {
        which::which(program).with_context(|| format!("command not found: {program}"))?
    };
    Ok(ProcessConfig::new(executable).args(rest.iter().cloned()))
}

/// Launches `process`, waits for it, and prints its final record.
///
/// Ctrl+C or the optional timeout stops the process gracefully.
pub(crate) fn supervise(
    process: &ProcessConfig,
    config: RuntimeConfig,
    timeout: Option<Duration>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let mut manager = ProcessManager::new(config);
    manager.start_monitoring()?;

    let pid = manager
        .create_process(process)
        .with_context(|| format!("failed to launch {}", process.command_line()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to set Ctrl+C handler")?;

    wait_or_stop(&manager, pid, timeout, &interrupted)?;
    let record = manager.process_info(pid)?;
    manager.stop_monitoring();

    report(&record, json)?;
    Ok(exit_byte(&record).map_or(ExitCode::FAILURE, ExitCode::from))
}

fn wait_or_stop(
    manager: &ProcessManager,
    pid: ProcessId,
    timeout: Option<Duration>,
    interrupted: &AtomicBool,
) -> anyhow::Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if manager.wait_for_process(pid, Some(WAIT_SLICE))? {
            return Ok(());
        }
        let expired = deadline.is_some_and(|d| Instant::now() >= d);
        if interrupted.load(Ordering::SeqCst) || expired {
            tracing::info!(pid = %pid, expired, "stopping process");
            let graceful = manager.stop_process(pid, STOP_GRACE)?;
            if !graceful {
                tracing::warn!(pid = %pid, "process did not stop within the grace period");
            }
            return Ok(());
        }
    }
}

fn report(record: &ProcessRecord, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        eprintln!("{}", output::summarize(record));
    }
    Ok(())
}

/// Exit code to forward, if the process reported one that fits a byte.
fn exit_byte(record: &ProcessRecord) -> Option<u8> {
    record.exit_code.and_then(|code| u8::try_from(code).ok())
}

/// Parses `KEY=VALUE` pairs.
fn parse_env(pairs: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .with_context(|| format!("invalid environment variable {pair:?}, expected KEY=VALUE"))
        })
        .collect()
}

/// Applies `overrides` on top of `base`, keeping one entry per key.
fn merge_env(
    mut base: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
) -> Vec<(String, String)> {
    for (key, value) in overrides {
        base.retain(|(existing, _)| *existing != key);
        base.push((key, value));
    }
    base
}
