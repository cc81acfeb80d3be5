//! # nsbox
//!
//! Runs commands inside fresh or existing Linux namespaces and reports how
//! they ended.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    tracing::debug!(
        app = nsbox_common::constants::APP_NAME,
        version = env!("CARGO_PKG_VERSION"),
        "starting"
    );
    commands::execute(cli)
}
