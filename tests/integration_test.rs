//! End-to-end CLI tests driving the real `mux` binary against a freshly
//! daemonized server, isolated per test via `MUXKIT_SOCK_DIR` (§6, §4.D).

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("mux"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("terminal multiplexer"));
}

#[test]
fn test_list_empty_starts_daemon_and_prints_marker() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.env("MUXKIT_SOCK_DIR", temp_dir.path())
        .arg("-l")
        .assert()
        .success()
        .stdout(predicate::str::contains("no sessions"));
}

#[test]
fn test_kill_nonexistent_session_exits_zero() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.env("MUXKIT_SOCK_DIR", temp_dir.path())
        .args(["-k", "999"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not found"));
}

#[test]
fn test_attach_nonexistent_session_exits_zero_per_s5() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.env("MUXKIT_SOCK_DIR", temp_dir.path())
        .args(["-s", "999"])
        .assert()
        .success()
        .stdout(predicate::str::contains("attach failed"));
}

#[test]
fn test_history_on_fresh_server_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.env("MUXKIT_SOCK_DIR", temp_dir.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("no history"));
}

#[test]
fn test_rename_nonexistent_session_reports_failure_but_exits_zero() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.env("MUXKIT_SOCK_DIR", temp_dir.path())
        .args(["rename", "999", "new-name"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not found"));
}
