//! `nsbox exec`: run a command inside the namespaces of a running process.

use std::process::ExitCode;

use anyhow::Context;
use clap::Args;
use nsbox_common::config::RuntimeConfig;
use nsbox_common::types::{NamespaceKind, NamespaceSet, ProcessId};
use nsbox_core::namespace::namespace_id;

use crate::commands::run;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// PID of the process whose namespaces are joined.
    #[arg(long)]
    pub target: i32,

    /// Namespaces to join. Defaults to every namespace the target does not
    /// share with nsbox.
    #[arg(long, value_delimiter = ',')]
    pub ns: Vec<NamespaceKind>,

    /// Print the final process record as JSON.
    #[arg(long)]
    pub json: bool,

    /// Command and its arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Opens the target's namespace entries, launches the command inside them,
/// and waits for it. The exit status mirrors the command's exit code.
///
/// # Errors
///
/// Returns an error if the target's namespaces cannot be opened or the
/// command cannot be launched.
pub fn execute(args: ExecArgs, config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    let target = ProcessId::new(args.target);
    let kinds = if args.ns.is_empty() {
        foreign_namespaces(target)?
    } else {
        args.ns.iter().copied().collect()
    };
    if kinds.is_empty() {
        tracing::warn!(target_pid = %target, "target shares every namespace with nsbox");
    }

    let mut process = run::command_config(&args.command)?.inherit_env();
    for kind in kinds.iter() {
        process = process.join_namespace(target, kind);
    }
    tracing::debug!(target_pid = %target, namespaces = %kinds, "joining namespaces");

    run::supervise(&process, config, None, args.json)
}

/// Returns the namespaces of `target` that differ from the caller's.
fn foreign_namespaces(target: ProcessId) -> anyhow::Result<NamespaceSet> {
    let own = ProcessId::new(i32::try_from(std::process::id()).context("pid out of range")?);
    let mut kinds = NamespaceSet::empty();
    for kind in NamespaceKind::ALL {
        let theirs = namespace_id(target, kind)
            .with_context(|| format!("cannot inspect process {target}"))?;
        if namespace_id(own, kind).ok().as_deref() != Some(theirs.as_str()) {
            kinds.insert(kind);
        }
    }
    Ok(kinds)
}
