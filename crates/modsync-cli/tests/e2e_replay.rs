//! E2E tests for `modsync replay`: offline folding of frame captures.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CAPTURE: &str = r#"{"type":"queue:snapshot","events":[{"id":1,"did":"did:plc:alice","queueId":4,"startAt":"2024-05-01T10:00:00Z","endAt":""},{"id":2,"did":"did:plc:bob","queueId":5,"startAt":"2024-05-01T10:05:00Z","endAt":""}]}
{"type":"report:review:started","reportId":77,"moderator":{"did":"did:plc:alice"},"queues":[4]}
{"type":"report:review:started","reportId":78,"moderator":{"did":"did:plc:bob"}}
garbage line
{"type":"report:actioned","reportIds":[78],"moderator":{"did":"did:plc:bob"}}
{"type":"something:new","payload":1}
"#;

fn modsync_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("modsync"));
    cmd.current_dir(dir);
    cmd.env("MODSYNC_LOG", "error");
    for key in [
        "MODSYNC_SERVICE_URL",
        "MODSYNC_TOKEN",
        "MODSYNC_BEARER",
        "MODSYNC_FORMAT",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn write_capture(dir: &Path) -> PathBuf {
    fs::write(dir.join("modsync.toml"), "").unwrap();
    let path = dir.join("frames.jsonl");
    fs::write(&path, CAPTURE).unwrap();
    path
}

#[test]
fn replay_json_reports_counts_and_final_state() {
    let dir = TempDir::new().unwrap();
    let capture = write_capture(dir.path());

    let output = modsync_cmd(dir.path())
        .arg("replay")
        .arg(&capture)
        .args(["--now", "2024-05-01T12:00:00Z", "--queue", "4", "--json"])
        .output()
        .expect("replay should not crash");
    assert!(
        output.status.success(),
        "replay failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(summary["frames"], 6);
    assert_eq!(summary["applied"], 4);
    assert_eq!(summary["ignored"], 1);
    assert_eq!(summary["malformed"], 1);

    let state = &summary["state"];
    assert_eq!(state["queue"]["subscribed"], serde_json::json!([4]));
    assert_eq!(state["queue"]["items"].as_array().unwrap().len(), 2);

    let reports = state["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["reportId"], 77);
    assert_eq!(reports[0]["did"], "did:plc:alice");
    assert_eq!(reports[0]["queueId"], 4);
}

#[test]
fn replay_text_lists_one_record_per_line() {
    let dir = TempDir::new().unwrap();
    let capture = write_capture(dir.path());

    modsync_cmd(dir.path())
        .arg("replay")
        .arg(&capture)
        .args(["--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "frames 6 applied 4 ignored 1 malformed 1\n",
        ))
        .stdout(predicate::str::contains("queue 4 did:plc:alice\n"))
        .stdout(predicate::str::contains("report 77 did:plc:alice 4 (provisional)\n"))
        .stdout(predicate::str::contains("report 78").not());
}

#[test]
fn replay_reads_stdin() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("modsync.toml"), "").unwrap();

    let output = modsync_cmd(dir.path())
        .args(["replay", "-", "--json"])
        .write_stdin(CAPTURE)
        .output()
        .expect("replay should not crash");
    assert!(output.status.success());
    let summary: Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(summary["frames"], 6);
}

#[test]
fn replay_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("modsync.toml"), "").unwrap();

    modsync_cmd(dir.path())
        .args(["replay", "nope.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open"));
}
