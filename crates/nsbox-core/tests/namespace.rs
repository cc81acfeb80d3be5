//! Namespace handle behaviour against the running kernel.
//!
//! Creating a namespace changes the calling process, so every `create`
//! check runs in a forked child that reports through its exit status.

#![allow(unsafe_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use nsbox_common::error::NsboxError;
use nsbox_common::types::{NamespaceKind, ProcessId};
use nsbox_core::namespace::{NamespaceHandle, namespace_id};

const CHILD_OK: i32 = 0;
const CHILD_WRONG_RESULT: i32 = 3;

/// Runs `check` in a forked child and returns its exit status.
fn in_child(check: impl FnOnce() -> i32) -> i32 {
    // SAFETY: the child only calls fork-safe namespace functions and exits
    // with `_exit`, never returning into the test harness.
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = check();
            // SAFETY: terminating the forked child without running destructors.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child ended unexpectedly: {other:?}"),
        },
    }
}

#[test]
fn create_yields_valid_handle_or_creation_error() {
    for kind in NamespaceKind::ALL {
        let code = in_child(move || match NamespaceHandle::create(kind) {
            Ok(handle) if handle.is_valid() && handle.kind() == kind => CHILD_OK,
            Err(NsboxError::NamespaceCreationFailed { kind: failed, .. }) if failed == kind => {
                CHILD_OK
            }
            _ => CHILD_WRONG_RESULT,
        });
        assert_eq!(code, CHILD_OK, "unexpected create outcome for {kind}");
    }
}

#[test]
fn join_missing_process_reports_not_found_or_join_failure() {
    for kind in NamespaceKind::ALL {
        let err = NamespaceHandle::join(ProcessId::new(i32::MAX), kind).unwrap_err();
        assert!(
            matches!(
                err,
                NsboxError::NamespaceNotFound { .. } | NsboxError::NamespaceJoinFailed { .. }
            ),
            "unexpected error for {kind}: {err}"
        );
    }
}

#[test]
fn joining_own_namespace_is_harmless() {
    #[allow(clippy::cast_possible_wrap)]
    let me = ProcessId::new(std::process::id() as i32);
    let before = namespace_id(me, NamespaceKind::Uts).expect("uts id");
    let code = in_child(move || match NamespaceHandle::join(me, NamespaceKind::Uts) {
        // Rejoining the namespace we already live in succeeds with
        // CAP_SYS_ADMIN and fails with EPERM without it.
        Ok(()) | Err(NsboxError::NamespaceJoinFailed { .. }) => CHILD_OK,
        Err(_) => CHILD_WRONG_RESULT,
    });
    assert_eq!(code, CHILD_OK);
    assert_eq!(namespace_id(me, NamespaceKind::Uts).expect("uts id"), before);
}
