//! End-to-end tests of the `tripline` binary against fixture files.
//!
//! Tests cover:
//! 1. `list` prints every probe name
//! 2. A baseline run is silent; a later change is printed as a finding
//! 3. Corrupt state is reported and the process exits non-zero
//! 4. A deactivated probe does nothing
//! 5. An invalid configuration file fails before any probe runs
//! 6. `run-all` supervises every probe as a child process
//! 7. `test-alert` goes through the configured channel
//! 8. A process-table search reads a fixture `/proc`

use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const PROBES: [&str; 15] = [
    "monitor_cron",
    "monitor_hosts_file",
    "monitor_ld_preload",
    "monitor_modules",
    "monitor_passwd",
    "monitor_ssh_authorized_keys",
    "monitor_systemd_units",
    "search_deleted_exe",
    "search_dev_shm",
    "search_hidden_exe",
    "search_immutable_files",
    "search_memfd_create",
    "search_non_kthreads",
    "search_ssh_leftover_processes",
    "verify_deb_packages",
];

struct Fixture {
    dir: TempDir,
    config: PathBuf,
}

impl Fixture {
    /// Config with only `monitor_passwd` activated, reading a fixture passwd file.
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        fs::write(&passwd, "root:x:0:0:root:/root:/bin/bash\n").unwrap();

        let mut toml = format!(
            "state_dir = {:?}\nprobe_timeout_secs = 30\n\n[probes.monitor_passwd]\nactivated = true\npasswd_file = {:?}\n",
            dir.path().join("state"),
            passwd
        );
        for name in PROBES.iter().filter(|n| **n != "monitor_passwd") {
            toml.push_str(&format!("\n[probes.{name}]\nactivated = false\n"));
        }
        let config = dir.path().join("tripline.toml");
        fs::write(&config, toml).unwrap();
        Self { dir, config }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn tripline(&self, args: &[&str]) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("tripline").unwrap();
        cmd.args(args).arg("--config").arg(&self.config);
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

fn state_file(root: &Path, probe: &str) -> PathBuf {
    root.join("state").join(probe).join("state")
}

// ─── Test 1: list ───────────────────────────────────────────────────────────

#[test]
fn list_prints_every_probe() {
    let mut cmd = assert_cmd::Command::cargo_bin("tripline").unwrap();
    let assert = cmd.arg("list").assert().success();
    let out = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let names: Vec<&str> = out.lines().collect();
    assert_eq!(names, PROBES);
}

// ─── Test 2: baseline, then detection ───────────────────────────────────────

#[test]
fn baseline_is_silent_then_change_is_reported() {
    let fx = Fixture::new();

    fx.tripline(&["probe", "monitor_passwd", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(state_file(fx.dir.path(), "monitor_passwd").exists());

    // Unchanged input: nothing to report.
    fx.tripline(&["probe", "monitor_passwd"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    fs::write(
        fx.path("passwd"),
        "root:x:0:0:root:/root:/bin/bash\nmallory:x:1001:1001::/home/mallory:/bin/sh\n",
    )
    .unwrap();
    fx.tripline(&["probe", "monitor_passwd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finding in 'monitor_passwd':"))
        .stdout(predicate::str::contains("User 'mallory' was added."));

    // The new snapshot became the baseline.
    fx.tripline(&["probe", "monitor_passwd"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ─── Test 3: corrupt state ──────────────────────────────────────────────────

#[test]
fn corrupt_state_is_reported_and_kept() {
    let fx = Fixture::new();
    let state = state_file(fx.dir.path(), "monitor_passwd");
    fs::create_dir_all(state.parent().unwrap()).unwrap();
    fs::write(&state, "{not json").unwrap();

    fx.tripline(&["probe", "monitor_passwd"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Error in 'monitor_passwd':"))
        .stdout(predicate::str::contains("{not json"));

    assert_eq!(fs::read_to_string(&state).unwrap(), "{not json");
}

// ─── Test 4: deactivated probe ──────────────────────────────────────────────

#[test]
fn deactivated_probe_leaves_no_state() {
    let fx = Fixture::new();
    fx.tripline(&["probe", "monitor_hosts_file"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(!fx.path("state/monitor_hosts_file").exists());
}

// ─── Test 5: invalid configuration ──────────────────────────────────────────

#[test]
fn invalid_config_fails() {
    let fx = Fixture::new();
    fs::write(&fx.config, "probe_timeout_secs = \"soon\"\n").unwrap();
    fx.tripline(&["probe", "monitor_passwd"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn missing_explicit_config_fails() {
    let fx = Fixture::new();
    let mut cmd = assert_cmd::Command::cargo_bin("tripline").unwrap();
    cmd.args(["probe", "monitor_passwd", "--config"])
        .arg(fx.path("absent.toml"))
        .assert()
        .failure();
}

// ─── Test 6: run-all ────────────────────────────────────────────────────────

#[test]
fn run_all_relays_child_findings() {
    let fx = Fixture::new();
    fx.tripline(&["run-all", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    fs::write(fx.path("passwd"), "").unwrap();
    fx.tripline(&["run-all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("User 'root' was deleted."));
}

#[test]
fn run_all_fails_when_a_child_fails() {
    let fx = Fixture::new();
    let state = state_file(fx.dir.path(), "monitor_passwd");
    fs::create_dir_all(state.parent().unwrap()).unwrap();
    fs::write(&state, "garbage").unwrap();

    fx.tripline(&["run-all"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Error in 'monitor_passwd':"));
}

// ─── Test 7: test alert ─────────────────────────────────────────────────────

#[test]
fn test_alert_is_printed() {
    let fx = Fixture::new();
    fx.tripline(&["test-alert"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finding in 'test_alert':"))
        .stdout(predicate::str::contains("Alert test on host '"));
}

// ─── Test 8: process table ──────────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn deleted_binary_in_fixture_proc_is_reported() {
    let fx = Fixture::new();
    let proc = fx.path("proc");
    for (pid, exe) in [("1", "/sbin/init"), ("4242", "/tmp/.cache/agent (deleted)")] {
        fs::create_dir_all(proc.join(pid)).unwrap();
        std::os::unix::fs::symlink(exe, proc.join(pid).join("exe")).unwrap();
    }
    let mut config = fs::read_to_string(&fx.config).unwrap();
    config = config.replace(
        "[probes.search_deleted_exe]\nactivated = false\n",
        &format!("[probes.search_deleted_exe]\nactivated = true\nproc_dir = {proc:?}\n"),
    );
    fs::write(&fx.config, config).unwrap();

    // Nothing to seed.
    fx.tripline(&["probe", "search_deleted_exe", "--init"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    fx.tripline(&["probe", "search_deleted_exe"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finding in 'search_deleted_exe':"))
        .stdout(predicate::str::contains("Pid: 4242; Exe: /tmp/.cache/agent (deleted)"))
        .stdout(predicate::str::contains("/sbin/init").not());
    assert!(!fx.path("state/search_deleted_exe").exists());
}
