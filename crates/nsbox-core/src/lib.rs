//! # nsbox-core
//!
//! Low-level Linux namespace primitives for the nsbox runtime.
//!
//! This crate provides safe abstractions over `unshare(2)`, `setns(2)`
//! and the `/proc/<pid>/ns/*` entries:
//! - [`NamespaceHandle`](namespace::NamespaceHandle): exclusive ownership of
//!   one namespace membership or one opened namespace entry.
//! - [`uts`](namespace::uts): hostname management inside a UTS namespace.
//! - [`user`](namespace::user): UID/GID maps for user namespaces.
//!
//! Functions documented as fork-safe perform no heap allocation and no
//! logging, so the process launcher can call them between `fork(2)` and
//! `execve(2)`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod namespace;
