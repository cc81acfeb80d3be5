//! Namespace-isolated process lifecycle for the nsbox runtime.
//!
//! [`ProcessManager`](manager::ProcessManager) is the entry point: it
//! launches processes into the namespaces a
//! [`ProcessConfig`](process::ProcessConfig) requests, tracks them in a
//! [`ProcessTable`](table::ProcessTable), reconciles their status from a
//! background [`ProcessMonitor`](monitor::ProcessMonitor), and stops them
//! gracefully or by force.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod launcher;
pub mod manager;
pub mod monitor;
pub mod ops;
pub mod process;
pub mod table;
mod termination;

pub use nix::sys::signal::Signal;
