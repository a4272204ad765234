//! Session lifecycle over the CLI surface: list/kill/rename/history against
//! a real daemon, exercised without ever attaching a terminal (§6, §8).

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn mux(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mux").unwrap();
    cmd.env("MUXKIT_SOCK_DIR", dir.path());
    cmd
}

#[test]
fn test_list_then_kill_on_empty_daemon() {
    let dir = TempDir::new().unwrap();

    mux(&dir).arg("-l").assert().success().stdout(predicate::str::contains("no sessions"));

    mux(&dir)
        .args(["-k", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("session 1 not found"));
}

#[test]
fn test_rename_on_empty_daemon_reports_not_found() {
    let dir = TempDir::new().unwrap();
    mux(&dir)
        .args(["rename", "1", "renamed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("session 1 not found"));
}

#[test]
fn test_rename_rejects_empty_name_server_side() {
    let dir = TempDir::new().unwrap();
    mux(&dir)
        .args(["rename", "1", ""])
        .assert()
        .success()
        .stdout(predicate::str::contains("must not be empty"));
}

#[test]
fn test_history_empty_then_after_a_kill_attempt() {
    let dir = TempDir::new().unwrap();
    mux(&dir).arg("history").assert().success().stdout(predicate::str::contains("no history"));

    // A kill against a nonexistent id does not itself create a session, so
    // it leaves no history trail to read back (§4.E binding rule).
    mux(&dir).args(["-k", "7"]).assert().success();
    mux(&dir).arg("history").assert().success().stdout(predicate::str::contains("no history"));
}

#[test]
fn test_same_socket_dir_serves_repeated_invocations() {
    // The daemon started by the first invocation must still be listening
    // for the second (§4.D ensure_server_running reconnects if already up).
    let dir = TempDir::new().unwrap();
    mux(&dir).arg("-l").assert().success();
    mux(&dir).arg("-l").assert().success().stdout(predicate::str::contains("no sessions"));
}
