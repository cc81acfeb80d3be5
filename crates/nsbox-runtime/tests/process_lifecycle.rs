//! Lifecycle tests against real child processes.
//!
//! Most of these run without isolation so they pass unprivileged. Namespace
//! creation is exercised where the kernel permits it and otherwise must fail
//! with a creation error, leaving nothing registered.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use nsbox_common::config::RuntimeConfig;
use nsbox_common::error::NsboxError;
use nsbox_common::types::{NamespaceKind, ProcessId, ProcessStatus};
use nsbox_core::namespace::user::IdMapping;
use nsbox_runtime::Signal;
use nsbox_runtime::manager::ProcessManager;
use nsbox_runtime::process::ProcessConfig;

const SEARCH_PATH: &str = "/usr/bin:/bin";

fn manager() -> ProcessManager {
    ProcessManager::new(RuntimeConfig {
        monitor_interval_ms: 20,
        stop_poll_interval_ms: 20,
        ..RuntimeConfig::default()
    })
}

fn shell(script: &str) -> ProcessConfig {
    ProcessConfig::new("/bin/sh")
        .args(["-c", script])
        .env("PATH", SEARCH_PATH)
}

/// Launches an isolated process, or returns `None` when the kernel or the
/// sandbox running the tests refuses namespace creation.
fn launch_isolated(manager: &ProcessManager, cfg: &ProcessConfig) -> Option<ProcessId> {
    match manager.create_process(cfg) {
        Ok(pid) => Some(pid),
        Err(err) if matches!(err.raw_os_error(), Some(libc::EPERM | libc::EACCES | libc::ENOSPC)) => {
            eprintln!("skipping: namespaces unavailable ({err})");
            None
        }
        Err(err) => panic!("launch failed: {err}"),
    }
}

/// Waits for `pid` to exit cleanly and returns what it wrote to `out`.
fn run_to_file(manager: &ProcessManager, pid: ProcessId, out: &std::path::Path) -> String {
    assert!(manager.wait_for_process(pid, Some(Duration::from_secs(5))).unwrap());
    assert_eq!(manager.process_info(pid).unwrap().exit_code, Some(0));
    std::fs::read_to_string(out).unwrap()
}

#[test]
fn missing_executable_is_a_creation_failure() {
    let manager = manager();
    let err = manager
        .create_process(&ProcessConfig::new("/nonexistent/nsbox/binary"))
        .unwrap_err();
    assert!(matches!(err, NsboxError::ProcessCreationFailed { .. }));
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    assert!(manager.managed_processes().is_empty());
}

#[test]
fn exit_code_is_reported_after_wait() {
    let manager = manager();
    let pid = manager.create_process(&shell("exit 7")).unwrap();

    assert!(manager.wait_for_process(pid, Some(Duration::from_secs(5))).unwrap());
    assert!(!manager.is_process_running(pid));
    let rec = manager.process_info(pid).unwrap();
    assert_eq!(rec.status, ProcessStatus::Stopped);
    assert_eq!(rec.exit_code, Some(7));
    assert_eq!(rec.signal, None);
    assert_eq!(rec.command_line, "/bin/sh -c exit 7");
}

#[test]
fn wait_times_out_while_process_runs() {
    let manager = manager();
    let pid = manager.create_process(&shell("sleep 5")).unwrap();

    let started = Instant::now();
    assert!(!manager.wait_for_process(pid, Some(Duration::from_millis(100))).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(manager.is_process_running(pid));

    assert!(manager.stop_process(pid, Duration::from_secs(2)).unwrap());
}

#[test]
fn cooperative_process_stops_gracefully() {
    let manager = manager();
    let pid = manager
        .create_process(&ProcessConfig::new("/bin/sleep").arg("30"))
        .unwrap();

    assert!(manager.stop_process(pid, Duration::from_secs(5)).unwrap());
    assert!(!manager.is_process_running(pid));
    let rec = manager.process_info(pid).unwrap();
    assert_eq!(rec.signal, Some(Signal::SIGTERM as i32));
    assert_eq!(rec.exit_code, Some(128 + Signal::SIGTERM as i32));
}

#[test]
fn process_ignoring_sigterm_is_killed() {
    let manager = manager();
    let pid = manager
        .create_process(&shell("trap '' TERM; while :; do sleep 0.1; done"))
        .unwrap();
    // Give the shell time to install the trap.
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    assert!(!manager.stop_process(pid, Duration::from_millis(500)).unwrap());
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(!manager.is_process_running(pid));
    assert_eq!(
        manager.process_info(pid).unwrap().signal,
        Some(Signal::SIGKILL as i32)
    );
}

#[test]
fn kill_delivers_signal_to_running_process() {
    let manager = manager();
    let pid = manager
        .create_process(&ProcessConfig::new("/bin/sleep").arg("30"))
        .unwrap();
    manager.kill_process(pid, Signal::SIGKILL).unwrap();
    assert!(manager.wait_for_process(pid, Some(Duration::from_secs(5))).unwrap());
    assert_eq!(manager.process_info(pid).unwrap().exit_code, Some(137));
}

#[test]
fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let manager = manager();
    let cfg = shell("pwd > marker").working_dir(dir.path());
    let pid = manager.create_process(&cfg).unwrap();

    assert!(manager.wait_for_process(pid, Some(Duration::from_secs(5))).unwrap());
    assert_eq!(manager.process_info(pid).unwrap().exit_code, Some(0));
    let written = std::fs::read_to_string(marker).unwrap();
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(written.trim(), expected.to_str().unwrap());
}

#[test]
fn environment_is_exactly_the_configured_one() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("env");
    let manager = manager();
    let cfg = shell(&format!("echo \"$NSBOX_MARKER:$HOME\" > {}", out.display()))
        .env("NSBOX_MARKER", "visible");
    let pid = manager.create_process(&cfg).unwrap();

    assert!(manager.wait_for_process(pid, Some(Duration::from_secs(5))).unwrap());
    assert_eq!(std::fs::read_to_string(out).unwrap().trim(), "visible:");
}

#[test]
fn concurrent_creates_are_all_tracked_then_swept() {
    const COUNT: usize = 8;
    let mut manager = manager();
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    manager.set_exit_callback(move |_| {
        let _ = counter.fetch_add(1, Ordering::SeqCst);
    });

    let pids: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..COUNT)
            .map(|_| scope.spawn(|| manager.create_process(&shell("sleep 0.2")).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut managed = manager.managed_processes();
    managed.sort_unstable();
    let mut expected = pids.clone();
    expected.sort_unstable();
    assert_eq!(managed, expected);

    manager.start_monitoring().unwrap();
    for pid in &pids {
        assert!(manager.wait_for_process(*pid, Some(Duration::from_secs(5))).unwrap());
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while !manager.managed_processes().is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(manager.managed_processes().is_empty());
    assert_eq!(notified.load(Ordering::SeqCst), COUNT);
    manager.stop_monitoring();
}

#[test]
fn namespace_request_either_isolates_or_fails_cleanly() {
    let manager = manager();
    let cfg = ProcessConfig::new("/bin/true")
        .namespace(NamespaceKind::User)
        .namespace(NamespaceKind::Uts)
        .hostname("nsbox-test");

    match manager.create_process(&cfg) {
        Ok(pid) => {
            assert!(manager.wait_for_process(pid, Some(Duration::from_secs(5))).unwrap());
            let rec = manager.process_info(pid).unwrap();
            assert!(rec.namespaces.contains(NamespaceKind::User));
            assert!(rec.namespaces.contains(NamespaceKind::Uts));
        }
        Err(err) => {
            assert!(matches!(err, NsboxError::ProcessCreationFailed { .. }));
            assert!(err.raw_os_error().is_some());
            assert!(manager.managed_processes().is_empty());
        }
    }
}

#[test]
fn joining_a_missing_process_namespace_fails_before_fork() {
    let manager = manager();
    let cfg = ProcessConfig::new("/bin/true")
        .join_namespace(ProcessId::new(i32::MAX), NamespaceKind::Network);
    let err = manager.create_process(&cfg).unwrap_err();
    assert!(err.is_namespace_not_found());
}

#[test]
fn launched_process_starts_with_default_sigpipe() {
    const SIGPIPE_BIT: u64 = 1 << (libc::SIGPIPE - 1);
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("sigign");
    let manager = manager();
    let script = format!(
        "while read -r key value; do if [ \"$key\" = SigIgn: ]; then echo \"$value\"; fi; done \
         < /proc/self/status > {}",
        out.display()
    );
    let pid = manager.create_process(&shell(&script)).unwrap();

    let mask = u64::from_str_radix(run_to_file(&manager, pid, &out).trim(), 16).unwrap();
    assert_eq!(mask & SIGPIPE_BIT, 0, "SIGPIPE ignored in child: {mask:#x}");
}

#[test]
fn hostname_is_applied_inside_new_uts_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("hostname");
    let manager = manager();
    let cfg = shell(&format!("cat /proc/sys/kernel/hostname > {}", out.display()))
        .namespace(NamespaceKind::User)
        .namespace(NamespaceKind::Uts)
        .hostname("nsbox-uts");
    let Some(pid) = launch_isolated(&manager, &cfg) else {
        return;
    };

    assert_eq!(run_to_file(&manager, pid, &out).trim(), "nsbox-uts");
}

#[test]
fn id_maps_are_written_for_new_user_namespace() {
    use std::os::unix::fs::MetadataExt;

    let me = std::fs::metadata("/proc/self").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let uid_out = dir.path().join("uid_map");
    let gid_out = dir.path().join("gid_map");
    let manager = manager();
    let cfg = shell(&format!(
        "cat /proc/self/uid_map > {}; cat /proc/self/gid_map > {}",
        uid_out.display(),
        gid_out.display()
    ))
    .namespace(NamespaceKind::User)
    .uid_map(IdMapping::root_as(me.uid()))
    .gid_map(IdMapping::root_as(me.gid()));
    let Some(pid) = launch_isolated(&manager, &cfg) else {
        return;
    };

    let uid_map = run_to_file(&manager, pid, &uid_out);
    let gid_map = std::fs::read_to_string(gid_out).unwrap();
    let fields = |map: &str| map.split_whitespace().map(str::to_owned).collect::<Vec<_>>();
    assert_eq!(fields(&uid_map), ["0".to_string(), me.uid().to_string(), "1".to_string()]);
    assert_eq!(fields(&gid_map), ["0".to_string(), me.gid().to_string(), "1".to_string()]);
}

#[test]
fn joined_uts_namespace_shares_hostname_with_target() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("hostname");
    let manager = manager();
    let target_cfg = ProcessConfig::new("/bin/sleep")
        .arg("30")
        .namespace(NamespaceKind::User)
        .namespace(NamespaceKind::Uts)
        .hostname("nsbox-joined");
    let Some(target) = launch_isolated(&manager, &target_cfg) else {
        return;
    };

    let cfg = shell(&format!("cat /proc/sys/kernel/hostname > {}", out.display()))
        .join_namespace(target, NamespaceKind::User)
        .join_namespace(target, NamespaceKind::Uts);
    let joined = launch_isolated(&manager, &cfg);
    assert!(manager.stop_process(target, Duration::from_secs(2)).unwrap());
    let Some(pid) = joined else {
        return;
    };

    assert_eq!(run_to_file(&manager, pid, &out).trim(), "nsbox-joined");
}
