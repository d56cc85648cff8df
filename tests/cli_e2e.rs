//! End-to-end CLI tests for the harvester binary.

use assert_cmd::Command;
use predicates::prelude::*;

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Harvest hotel listings"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// A bounded run (`--ticks 0`) against a scratch data root starts up,
/// runs migrations, and exits zero without ever dispatching anything.
#[test]
fn test_binary_bounded_run_against_scratch_data_root_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--data-root")
        .arg(tmp.path())
        .arg("--ticks")
        .arg("0")
        .env("VPN_ENABLED", "false")
        .assert()
        .success();
}

/// Enqueuing a URL on a bounded run still exits zero; the listing is left
/// `pending` (no fetcher will ever reach it within zero ticks).
#[test]
fn test_binary_enqueues_url_then_exits_on_bounded_run() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--data-root")
        .arg(tmp.path())
        .arg("--ticks")
        .arg("0")
        .arg("https://www.catalog/hotel/example.html")
        .env("VPN_ENABLED", "false")
        .assert()
        .success();
}

/// `-q` suppresses non-error output but still exits zero on a bounded run.
#[test]
fn test_binary_quiet_flag_accepted_on_bounded_run() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--data-root")
        .arg(tmp.path())
        .arg("--ticks")
        .arg("0")
        .arg("-q")
        .env("VPN_ENABLED", "false")
        .assert()
        .success();
}
