//! End-to-end integration tests for the usage analytics flow.
//!
//! Tests the full pipeline: import → detect → analyze → status → purge,
//! driving the `ua` binary against a database in a temporary directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn ua_binary() -> String {
    env!("CARGO_BIN_EXE_ua").to_string()
}

const FIXTURE: &str = r#"{
    "users": [
        {
            "id": "u1",
            "username": "ana",
            "subscriptions": [
                {"endpoint": "https://push.example/ana", "keys": {"p256dh": "BKey", "auth": "secret"}}
            ]
        }
    ],
    "resources": [
        {
            "id": "printer",
            "name": "Printer",
            "created_by": {"id": "u1", "username": "ana"},
            "tickets": [
                {
                    "user": {"id": "u1", "username": "ana"},
                    "statuses": [
                        {"status_code": "ACTIVE", "timestamp": "2023-01-01T10:00:00Z"},
                        {"status_code": "INACTIVE", "timestamp": "2023-01-01T10:20:00Z"},
                        {"status_code": "ACTIVE", "timestamp": "2023-01-02T10:10:00Z"},
                        {"status_code": "ACTIVE", "timestamp": "2023-01-03T09:50:00Z"}
                    ]
                }
            ]
        }
    ]
}"#;

/// Builds a `ua` command isolated to `temp`, with a threshold of 2.
fn ua(temp: &Path) -> Command {
    let mut command = Command::new(ua_binary());
    command
        .env_clear()
        .env("HOME", temp)
        .env("UA_DATABASE_PATH", temp.join("ua.db"))
        .env("UA_NOTIFICATION_FREQUENCY_THRESHOLD", "2");
    command
}

fn run_ok(command: &mut Command) -> String {
    let output = command.output().expect("failed to run ua");
    assert_success(&output);
    String::from_utf8(output.stdout).unwrap()
}

fn run_with_stdin(mut command: Command, stdin: &str) -> Output {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn ua");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "ua should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_import_then_dry_run_finds_late_user() {
    let temp = TempDir::new().unwrap();

    let mut import = ua(temp.path());
    import.arg("import");
    let output = run_with_stdin(import, FIXTURE);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("4 new statuses"));

    let stdout = run_ok(
        ua(temp.path())
            .args(["analyze", "--dry-run", "--now", "2023-01-03T10:31:00Z"]),
    );
    assert!(
        stdout.contains("- Printer (printer) for ana [10:00:00]"),
        "unexpected dry run output: {stdout}"
    );

    // Outside the window nobody is due
    let stdout = run_ok(
        ua(temp.path())
            .args(["analyze", "--dry-run", "--now", "2023-01-03T11:00:00Z"]),
    );
    assert!(stdout.contains("No reminders due"), "got: {stdout}");

    let stdout = run_ok(ua(temp.path()).arg("status"));
    assert!(stdout.contains("Resources: 1"), "got: {stdout}");
    assert!(stdout.contains("Statuses: 4"), "got: {stdout}");
    assert!(stdout.contains("Pending notifications: 0"), "got: {stdout}");
}

#[test]
fn test_reimport_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let fixture_path = temp.path().join("fixture.json");
    std::fs::write(&fixture_path, FIXTURE).unwrap();

    for _ in 0..2 {
        run_ok(
            ua(temp.path())
                .arg("import")
                .arg("--input")
                .arg(&fixture_path),
        );
    }

    let stdout = run_ok(ua(temp.path()).arg("status"));
    assert!(stdout.contains("Statuses: 4"), "got: {stdout}");
    assert!(stdout.contains("Push subscriptions: 1"), "got: {stdout}");
}

#[test]
fn test_detect_reads_timestamps_from_stdin() {
    let temp = TempDir::new().unwrap();
    let mut detect = ua(temp.path());
    detect.args(["detect", "--json", "--now", "2023-01-03T10:31:00Z"]);

    let output = run_with_stdin(
        detect,
        "2023-01-01T10:00:00Z\n2023-01-02T10:10:00Z\n2023-01-03T09:50:00Z\n",
    );
    assert_success(&output);

    let detection: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(detection["clusters"]["10:00:00"]["frequency"], 2);
    assert_eq!(detection["clusters"]["10:00:00"]["seen_today"], false);
    assert_eq!(detection["eligible"], serde_json::json!(["10:00:00"]));
}

#[test]
fn test_detect_honors_raw_environment_tuning() {
    let temp = TempDir::new().unwrap();
    let mut detect = ua(temp.path());
    detect
        .env_remove("UA_NOTIFICATION_FREQUENCY_THRESHOLD")
        .env("NOTIFICATION_FREQUENCY_THRESHOLD", "3")
        .args(["detect", "--json", "--now", "2023-01-03T10:31:00Z"]);

    let output = run_with_stdin(
        detect,
        "2023-01-01T10:00:00Z\n2023-01-02T10:10:00Z\n2023-01-03T09:50:00Z\n",
    );
    assert_success(&output);

    let detection: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(detection["eligible"], serde_json::json!([]));
}

#[test]
fn test_detect_rejects_bad_timestamps() {
    let temp = TempDir::new().unwrap();
    let mut detect = ua(temp.path());
    detect.arg("detect");

    let output = run_with_stdin(detect, "2023-01-01T10:00:00Z\nyesterday\n");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2"));
}

#[test]
fn test_analyze_requires_vapid_settings() {
    let temp = TempDir::new().unwrap();
    let output = ua(temp.path())
        .args(["analyze", "--no-wait"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("REDIRECT_URL"));
}

#[test]
fn test_purge_on_empty_database() {
    let temp = TempDir::new().unwrap();
    let stdout = run_ok(ua(temp.path()).arg("purge"));
    assert!(stdout.contains("Purged 0 expired notifications"));
}
