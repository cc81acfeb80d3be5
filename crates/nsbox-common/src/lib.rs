//! # nsbox-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire nsbox workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and holds the data model that the namespace and process
//! layers exchange.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
