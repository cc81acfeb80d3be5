//! `nsbox ns`: list the namespace entries of a process.

use std::path::PathBuf;

use clap::Args;
use nsbox_common::types::{NamespaceKind, ProcessId};
use nsbox_core::namespace::{NamespaceHandle, namespace_id, ns_path_by_name};

/// Arguments for the `ns` command.
#[derive(Args, Debug)]
pub struct NsArgs {
    /// Process to inspect.
    pub pid: i32,

    /// Namespaces to show (pid, net, mnt, ...). Defaults to all.
    pub names: Vec<String>,

    /// Print the entries as JSON.
    #[arg(long)]
    pub json: bool,
}

/// One namespace entry of the inspected process.
#[derive(Debug)]
struct Entry {
    kind: NamespaceKind,
    path: PathBuf,
    id: Option<String>,
    openable: bool,
}

impl Entry {
    fn inspect(pid: ProcessId, name: &str) -> anyhow::Result<Self> {
        let path = ns_path_by_name(pid, name)?;
        let kind: NamespaceKind = name.parse()?;
        Ok(Self {
            kind,
            path,
            id: namespace_id(pid, kind).ok(),
            openable: NamespaceHandle::open_for(pid, kind).is_ok(),
        })
    }
}

/// Executes the `ns` command.
///
/// # Errors
///
/// Returns an error if a requested name is not a namespace kind.
pub fn execute(args: &NsArgs) -> anyhow::Result<()> {
    let pid = ProcessId::new(args.pid);
    let entries = if args.names.is_empty() {
        NamespaceKind::ALL
            .iter()
            .map(|kind| Entry::inspect(pid, kind.proc_name()))
            .collect::<anyhow::Result<Vec<_>>>()?
    } else {
        args.names
            .iter()
            .map(|name| Entry::inspect(pid, name))
            .collect::<anyhow::Result<Vec<_>>>()?
    };

    if args.json {
        let rows: Vec<_> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "kind": e.kind,
                    "path": e.path,
                    "id": e.id,
                    "openable": e.openable,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if entries.iter().all(|e| e.id.is_none()) {
        println!("No namespace entries found for process {pid}.");
        return Ok(());
    }
    println!("{:<8} {:<24} {:<28} {:<5}", "KIND", "PATH", "ID", "OPEN");
    for e in &entries {
        println!(
            "{:<8} {:<24} {:<28} {:<5}",
            e.kind.proc_name(),
            e.path.display(),
            e.id.as_deref().unwrap_or("-"),
            if e.openable { "yes" } else { "no" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_own_process_resolves_entries() {
        let own = ProcessId::new(i32::try_from(std::process::id()).unwrap());
        let entry = Entry::inspect(own, "net").unwrap();
        assert_eq!(entry.kind, NamespaceKind::Network);
        assert!(entry.path.ends_with("ns/net"));
        assert!(entry.id.as_deref().is_some_and(|id| id.starts_with("net:[")));
        assert!(entry.openable);
    }

    #[test]
    fn inspect_rejects_unknown_name() {
        assert!(Entry::inspect(ProcessId::new(1), "bogus").is_err());
    }

    #[test]
    fn inspect_missing_process_has_no_id() {
        let entry = Entry::inspect(ProcessId::new(i32::MAX), "uts").unwrap();
        assert!(entry.id.is_none());
        assert!(!entry.openable);
    }
}
