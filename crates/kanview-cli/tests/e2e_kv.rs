//! E2E tests for the `kv` binary.
//!
//! Each test writes board definitions and JSON issue dumps into an isolated
//! temp directory and runs `kv` there as a subprocess.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

const BOARD: &str = r#"
code = "KV"
id = 1
name = "Kanview"
owner = "owner"
rank_field = 10000
priorities = ["high", "low"]

[[columns]]
name = "Backlog"
backlog = true

[[columns]]
name = "In Progress"

[[columns]]
name = "Done"

[projects.KV.status_columns]
open = "Backlog"
"in progress" = "In Progress"
done = "Done"
"#;

/// Build a Command targeting the kv binary, rooted in `dir`.
fn kv_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("kv"));
    cmd.current_dir(dir);
    // Suppress tracing output that goes to stderr
    cmd.env("KANVIEW_LOG", "error");
    cmd.env_remove("FORMAT");
    cmd.env_remove("KANVIEW_RETENTION");
    cmd.env_remove("RUST_BACKTRACE");
    cmd.env_remove("RUST_LIB_BACKTRACE");
    cmd
}

fn setup() -> TempDir {
    let dir = TempDir::new().expect("create temp dir");
    std::fs::create_dir(dir.path().join("boards")).expect("create boards dir");
    std::fs::write(dir.path().join("boards/kv.toml"), BOARD).expect("write board");
    dir
}

fn issue(key: &str, status: &str, rank: &str) -> Value {
    json!({
        "key": key,
        "project": "KV",
        "issue_type": "task",
        "summary": format!("work on {key}"),
        "status": status,
        "rank": rank,
    })
}

fn write_dump(dir: &Path, name: &str, issues: &[Value]) {
    std::fs::write(
        dir.join(name),
        serde_json::to_string(issues).expect("serialize dump"),
    )
    .expect("write dump");
}

fn day_one(dir: &Path) {
    write_dump(
        dir,
        "day1.json",
        &[
            issue("KV-1", "in progress", "r10"),
            issue("KV-2", "in progress", "r20"),
            issue("KV-3", "in progress", "r30"),
        ],
    );
}

fn day_two(dir: &Path) {
    write_dump(
        dir,
        "day2.json",
        &[
            issue("KV-1", "in progress", "r10"),
            issue("KV-2", "done", "r20"),
            issue("KV-3", "in progress", "r30"),
            issue("KV-4", "in progress", "r15"),
        ],
    );
}

fn stdout_json(output: &std::process::Output) -> Value {
    assert!(
        output.status.success(),
        "kv failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON")
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

#[test]
fn show_json_lists_columns_in_rank_order() {
    let dir = setup();
    day_two(dir.path());

    let output = kv_cmd(dir.path())
        .args(["show", "KV", "--issues", "day2.json", "--json"])
        .output()
        .expect("show should not crash");
    let view = stdout_json(&output);

    assert_eq!(view["code"], "KV");
    assert_eq!(view["version"], 1);
    assert_eq!(view["columns"][1]["name"], "In Progress");
    assert_eq!(view["columns"][1]["keys"], json!(["KV-1", "KV-4", "KV-3"]));
    assert_eq!(view["columns"][2]["keys"], json!(["KV-2"]));
}

#[test]
fn show_text_emits_one_row_per_issue() {
    let dir = setup();
    day_one(dir.path());

    kv_cmd(dir.path())
        .args(["show", "KV", "--issues", "day1.json", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("In Progress\t0\tKV-1\t-\twork on KV-1"))
        .stdout(predicate::str::contains("In Progress\t2\tKV-3"));
}

#[test]
fn show_hides_backlog_on_request() {
    let dir = setup();
    write_dump(
        dir.path(),
        "issues.json",
        &[issue("KV-1", "open", "r1"), issue("KV-2", "done", "r2")],
    );

    let output = kv_cmd(dir.path())
        .args(["show", "KV", "--issues", "issues.json", "--hide-backlog", "--json"])
        .output()
        .expect("show should not crash");
    let view = stdout_json(&output);

    assert_eq!(view["columns"][0]["keys"], json!([]));
    assert_eq!(view["columns"][2]["keys"], json!(["KV-2"]));
    assert!(view["issues"].get("KV-1").is_none());
}

#[test]
fn show_replays_every_dump() {
    let dir = setup();
    day_one(dir.path());
    day_two(dir.path());

    let output = kv_cmd(dir.path())
        .args([
            "show", "KV", "--issues", "day1.json", "--issues", "day2.json", "--json",
        ])
        .output()
        .expect("show should not crash");
    let view = stdout_json(&output);

    assert_eq!(view["version"], 2);
    assert_eq!(view["columns"][2]["keys"], json!(["KV-2"]));
}

#[test]
fn unknown_board_reports_error_code() {
    let dir = setup();
    day_one(dir.path());

    let output = kv_cmd(dir.path())
        .args(["show", "NOPE", "--issues", "day1.json", "--json"])
        .output()
        .expect("show should not crash");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let start = stderr.find('{').expect("stderr should carry a JSON error");
    let end = stderr.rfind('}').expect("JSON error should close");
    let error: Value =
        serde_json::from_str(&stderr[start..=end]).expect("stderr error should be valid JSON");
    assert_eq!(error["error"]["error_code"], "E2001");
}

#[test]
fn unreadable_dump_is_source_unavailable() {
    let dir = setup();

    kv_cmd(dir.path())
        .args(["show", "KV", "--issues", "missing.json", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("issue source unavailable"))
        .stderr(predicate::str::contains("missing.json"));
}

// ---------------------------------------------------------------------------
// changes
// ---------------------------------------------------------------------------

#[test]
fn changes_between_dumps() {
    let dir = setup();
    day_one(dir.path());
    day_two(dir.path());

    let output = kv_cmd(dir.path())
        .args([
            "changes", "KV", "--issues", "day1.json", "--issues", "day2.json", "--json",
        ])
        .output()
        .expect("changes should not crash");
    let report = stdout_json(&output);

    assert_eq!(report["from_version"], 1);
    assert_eq!(report["to_version"], 2);
    assert_eq!(report["added"][0]["key"], "KV-4");
    assert_eq!(report["added"][0]["placement"], json!({"column": 1, "index": 1}));
    assert_eq!(report["updated"][0]["key"], "KV-2");
    assert_eq!(report["updated"][0]["placement"]["column"], 2);
    assert_eq!(report["removed"], json!([]));
    assert_eq!(report["columns"], json!(["Backlog", "In Progress", "Done"]));
}

#[test]
fn changes_verify_reproduces_current_view() {
    let dir = setup();
    day_one(dir.path());
    day_two(dir.path());

    kv_cmd(dir.path())
        .args([
            "changes",
            "KV",
            "--issues",
            "day1.json",
            "--issues",
            "day2.json",
            "--verify",
            "--format",
            "text",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("version\t1\t2"))
        .stdout(predicate::str::contains("+\tKV-4\tIn Progress\t1"))
        .stdout(predicate::str::contains("verified\ttrue"));
}

#[test]
fn changes_from_current_version_are_empty() {
    let dir = setup();
    day_one(dir.path());

    let output = kv_cmd(dir.path())
        .args(["changes", "KV", "--issues", "day1.json", "--from", "1", "--json"])
        .output()
        .expect("changes should not crash");
    let report = stdout_json(&output);

    assert_eq!(report["to_version"], 1);
    assert_eq!(report["added"], json!([]));
    assert_eq!(report["updated"], json!([]));
}

#[test]
fn changes_from_future_version_are_stale() {
    let dir = setup();
    day_one(dir.path());

    kv_cmd(dir.path())
        .args(["changes", "KV", "--issues", "day1.json", "--from", "9", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2002"));
}

#[test]
fn changes_beyond_retention_are_stale() {
    let dir = setup();
    day_one(dir.path());
    day_two(dir.path());

    kv_cmd(dir.path())
        .env("KANVIEW_RETENTION", "1")
        .args([
            "changes", "KV", "--issues", "day1.json", "--issues", "day2.json", "--issues",
            "day1.json", "--from", "1", "--json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E2002"));
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[test]
fn check_accepts_valid_boards() {
    let dir = setup();

    let output = kv_cmd(dir.path())
        .args(["check", "--json"])
        .output()
        .expect("check should not crash");
    let checked = stdout_json(&output);

    assert_eq!(checked[0]["file"], "kv.toml");
    assert_eq!(checked[0]["code"], "KV");
    assert_eq!(checked[0]["ok"], true);
}

#[test]
fn check_reports_invalid_boards() {
    let dir = setup();
    std::fs::write(
        dir.path().join("boards/broken.toml"),
        BOARD
            .replace("code = \"KV\"", "code = \"BR\"")
            .replace("done = \"Done\"", "done = \"Shipped\""),
    )
    .expect("write broken board");
    std::fs::write(dir.path().join("boards/garbage.toml"), "code = [").expect("write garbage");

    let output = kv_cmd(dir.path())
        .args(["check", "--json"])
        .output()
        .expect("check should not crash");
    assert!(!output.status.success());

    let checked: Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be valid JSON");
    let by_file = |name: &str| {
        checked
            .as_array()
            .expect("array")
            .iter()
            .find(|c| c["file"] == name)
            .cloned()
            .expect("file reported")
    };

    let broken = by_file("broken.toml");
    assert_eq!(broken["ok"], false);
    assert_eq!(broken["error_code"], "E1001");
    assert!(
        broken["message"]
            .as_str()
            .expect("message")
            .contains("unknown column 'Shipped'")
    );

    let garbage = by_file("garbage.toml");
    assert_eq!(garbage["error_code"], "E1002");

    assert_eq!(by_file("kv.toml")["ok"], true);
}

#[test]
fn check_missing_directory_fails() {
    let dir = TempDir::new().expect("create temp dir");

    kv_cmd(dir.path())
        .args(["check", "--boards", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read board directory"));
}

// ---------------------------------------------------------------------------
// engine settings
// ---------------------------------------------------------------------------

#[test]
fn malformed_engine_config_is_reported() {
    let dir = setup();
    day_one(dir.path());
    std::fs::write(dir.path().join("kanview.toml"), "retention = \"lots\"").expect("write config");

    kv_cmd(dir.path())
        .args(["show", "KV", "--issues", "day1.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}
