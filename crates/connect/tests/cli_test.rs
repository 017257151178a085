//! Integration tests for the `connect` binary.
//!
//! Argument parsing, config management and status reporting, all without
//! a mothership or a local GraphQL engine.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

const SANDBOX: &str = "/tmp/connect-cli-test-nonexistent";

/// Build a [`Command`] for the `connect` binary with env isolation.
///
/// Clears the `CONNECT_*` variables the binary reads and points config
/// directories at a nonexistent path so tests never touch real state.
fn connect_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("connect");
    cmd.env("HOME", SANDBOX)
        .env("XDG_CONFIG_HOME", SANDBOX)
        .env("XDG_DATA_HOME", SANDBOX)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("CONNECT_CONFIG_FILE")
        .env_remove("CONNECT_OUTPUT")
        .env_remove("CONNECT_ENDPOINT")
        .env_remove("CONNECT_DEVICE_API_KEY")
        .env_remove("CONNECT_LOCAL_API_KEY")
        .env_remove("CONNECT_MOTHERSHIP__API_KEY")
        .env_remove("CONNECT_LOCAL__API_KEY")
        .env_remove("CONNECT_STATE_DIR");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn write_snapshot(dir: &Path) {
    let snapshot = serde_json::json!({
        "connection": {
            "phase": "ERROR_RETRYING",
            "timeoutMs": 2400,
            "error": "connection refused",
            "since": "2026-10-17T08:00:00Z",
            "attempt": 3
        },
        "remoteAccess": {
            "enabledType": "STATIC",
            "runningType": "DISABLED",
            "clients": 0
        },
        "updatedAt": "2026-10-17T08:00:01Z"
    });
    std::fs::write(
        dir.join("status.json"),
        serde_json::to_vec_pretty(&snapshot).unwrap(),
    )
    .unwrap();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = connect_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    connect_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("mothership")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("report"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    connect_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("connect"));
}

#[test]
fn test_completions_bash() {
    connect_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_mode_rejected() {
    let output = connect_cmd()
        .args(["run", "--mode", "sometimes"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("sometimes"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    connect_cmd()
        .args(["config", "path", "--config", "/etc/connect/custom.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/connect/custom.toml"));
}

#[test]
fn test_config_init_defaults_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    connect_cmd()
        .args(["config", "init", "--defaults", "--config", path])
        .assert()
        .success();

    let output = connect_cmd()
        .args(["config", "show", "-o", "json", "--config", path])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["mothership"]["endpoint"], "wss://mothership.unraid.net/ws");
    assert_eq!(shown["remote_access"]["mode"], "DISABLED");
    assert_eq!(shown["local"]["graphql_url"], "http://127.0.0.1/graphql");
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[remote_access]\nmode = \"STATIC\"\n").unwrap();

    let output = connect_cmd()
        .args(["config", "init", "--defaults", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(10));
    assert!(combined_output(&output).contains("already exists"));

    // Untouched.
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("STATIC"));
}

#[test]
fn test_config_show_redacts_plaintext_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[mothership]\napi_key = \"super-secret\"\n").unwrap();

    connect_cmd()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("****").and(predicate::str::contains("super-secret").not()));
}

#[test]
fn test_unknown_mode_in_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[remote_access]\nmode = \"SOMETIMES\"\n").unwrap();

    let output = connect_cmd()
        .args(["config", "show", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(10));
}

// ── Report ──────────────────────────────────────────────────────────

#[test]
fn test_report_json_passes_snapshot_through() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path());

    let output = connect_cmd()
        .args(["report", "-o", "json", "--state-dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["connection"]["phase"], "ERROR_RETRYING");
    assert_eq!(report["connection"]["timeoutMs"], 2400);
    assert_eq!(report["remoteAccess"]["enabledType"], "STATIC");
}

#[test]
fn test_report_table_shows_reconnect_countdown() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path());

    connect_cmd()
        .args(["status", "--state-dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("reconnecting in 3s")
                .and(predicate::str::contains("connection refused"))
                .and(predicate::str::contains("STATIC")),
        );
}

#[test]
fn test_report_without_snapshot_is_not_found() {
    let dir = tempfile::tempdir().unwrap();

    let output = connect_cmd()
        .args(["report", "--state-dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("No status snapshot"));
}

#[test]
fn test_report_corrupt_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("status.json"), "{not json").unwrap();

    let output = connect_cmd()
        .args(["report", "--state-dir"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("corrupt snapshot"));
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_without_device_key_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let output = connect_cmd()
        .args(["run", "--config"])
        .arg(&path)
        .arg("--state-dir")
        .arg(dir.path())
        .env("CONNECT_DEVICE_API_KEY", "")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("No device API key configured"));
}

#[test]
fn test_run_rejects_non_websocket_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let output = connect_cmd()
        .args(["run", "--endpoint", "https://mothership.example.net", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(10), "{}", combined_output(&output));
}
