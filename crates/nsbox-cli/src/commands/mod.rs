//! CLI command definitions and dispatch.

pub mod exec;
pub mod ns;
pub mod run;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nsbox_common::config::RuntimeConfig;

/// nsbox: run processes in isolated Linux namespaces.
#[derive(Parser, Debug)]
#[command(name = nsbox_common::constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime configuration file (JSON).
    #[arg(long, global = true, env = "NSBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in new namespaces and wait for it.
    Run(run::RunArgs),
    /// Run a command inside the namespaces of a running process.
    Exec(exec::ExecArgs),
    /// List the namespaces of a process.
    Ns(ns::NsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Exec(args) => exec::execute(args, config),
        Command::Ns(args) => ns::execute(&args).map(|()| ExitCode::SUCCESS),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let config = RuntimeConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    tracing::debug!(path = %path.display(), ?config, "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_parses_namespace_list_and_trailing_command() {
        let cli = Cli::try_parse_from([
            "nsbox", "run", "--ns", "net,uts", "--hostname", "box", "--", "echo", "-n", "hi",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.ns.len(), 2);
        assert_eq!(args.hostname.as_deref(), Some("box"));
        assert_eq!(args.command, ["echo", "-n", "hi"]);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        assert!(Cli::try_parse_from(["nsbox", "run", "--ns", "bogus", "--", "true"]).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.json"))).is_err());
        assert_eq!(load_config(None).unwrap(), RuntimeConfig::default());
    }
}
