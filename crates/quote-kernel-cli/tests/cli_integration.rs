use std::ffi::OsStr;
use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

/// An endpoint nothing listens on, so pushes and pulls fail fast.
fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .unwrap_or_else(|err| panic!("failed to bind placeholder listener: {err}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("failed to read placeholder listener address: {err}"));
    drop(listener);
    format!("http://{addr}/posts")
}

struct Workspace {
    dir: PathBuf,
    db: PathBuf,
    endpoint: String,
}

impl Workspace {
    fn new(prefix: &str) -> Self {
        let dir = unique_temp_dir(prefix);
        let db = dir.join("quotes.sqlite3");
        Self { dir, db, endpoint: closed_endpoint() }
    }

    fn run<I, S>(&self, args: I) -> Output
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(env!("CARGO_BIN_EXE_qk"))
            .arg("--db")
            .arg(&self.db)
            .arg("--remote-endpoint")
            .arg(&self.endpoint)
            .args(args)
            .output()
            .unwrap_or_else(|err| panic!("failed to execute qk binary: {err}"))
    }

    fn run_json<I, S>(&self, args: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args);
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            panic!(
                "qk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
                output.status, stdout, stderr
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        serde_json::from_str(&stdout)
            .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn texts(list: &Value) -> Vec<String> {
    list.get("quotes")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing quotes array in payload: {list}"))
        .iter()
        .map(|quote| as_str(quote, "text").to_string())
        .collect()
}

#[test]
fn first_run_lists_the_three_default_quotes() {
    let ws = Workspace::new("qk-cli-defaults");
    let listed = ws.run_json(["quote", "list"]);

    assert_eq!(as_str(&listed, "contract_version"), "cli.v1");
    assert_eq!(as_str(&listed, "origin"), "defaults");
    assert_eq!(texts(&listed).len(), 3);
    assert_eq!(as_str(&listed, "selected_category"), "all");
}

#[test]
fn added_quote_survives_into_the_next_invocation() {
    let ws = Workspace::new("qk-cli-add");
    let added = ws.run_json(["quote", "add", "--text", "X", "--category", "Y"]);
    assert_eq!(as_u64(&added, "total_quotes"), 4);

    let listed = ws.run_json(["quote", "list"]);
    assert_eq!(as_str(&listed, "origin"), "stored");
    assert_eq!(texts(&listed).last().map(String::as_str), Some("X"));

    let categories = listed
        .get("categories")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing categories in payload: {listed}"));
    assert_eq!(categories.first().and_then(Value::as_str), Some("all"));
    assert!(categories.iter().any(|category| category.as_str() == Some("Y")));
}

#[test]
fn blank_fields_are_rejected_without_writing() {
    let ws = Workspace::new("qk-cli-blank");
    let output = ws.run(["quote", "add", "--text", "   ", "--category", "Y"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("please fill in both the quote and category"), "stderr: {stderr}");

    let listed = ws.run_json(["quote", "list"]);
    assert_eq!(as_str(&listed, "origin"), "defaults");
}

#[test]
fn export_then_import_appends_every_quote() {
    let ws = Workspace::new("qk-cli-export");
    let export_path = ws.dir.join("out/quotes.json");

    let exported = ws.run_json(["export", "--out", path_str(&export_path)]);
    assert_eq!(as_u64(&exported, "quotes"), 3);
    assert_eq!(as_str(&exported, "sha256").len(), 64);

    let body = fs::read_to_string(&export_path)
        .unwrap_or_else(|err| panic!("failed to read export {}: {err}", export_path.display()));
    let parsed: Value = serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("export is not valid JSON: {err}"));
    assert_eq!(parsed.as_array().map(Vec::len), Some(3));

    let imported = ws.run_json(["import", "--in", path_str(&export_path)]);
    let summary = imported
        .get("summary")
        .unwrap_or_else(|| panic!("missing summary in payload: {imported}"));
    assert_eq!(as_u64(summary, "imported"), 3);
    assert_eq!(as_u64(summary, "total_quotes"), 6);
}

#[test]
fn import_of_non_array_fails_and_leaves_store_untouched() {
    let ws = Workspace::new("qk-cli-bad-import");
    let bad = ws.dir.join("bad.json");
    fs::write(&bad, r#"{"text":"a","category":"b"}"#)
        .unwrap_or_else(|err| panic!("failed to write fixture: {err}"));

    let output = ws.run(["import", "--in", path_str(&bad)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid file format"), "stderr: {stderr}");

    let listed = ws.run_json(["quote", "list"]);
    assert_eq!(texts(&listed).len(), 3);
}

#[test]
fn imported_extra_fields_reach_the_next_export() {
    let ws = Workspace::new("qk-cli-extra-fields");
    let input = ws.dir.join("extra.json");
    fs::write(&input, r#"[{"text":"a","category":"b","author":"z"},{"text":"lone"}]"#)
        .unwrap_or_else(|err| panic!("failed to write fixture: {err}"));

    let imported = ws.run_json(["import", "--in", path_str(&input)]);
    let summary = imported
        .get("summary")
        .unwrap_or_else(|| panic!("missing summary in payload: {imported}"));
    assert_eq!(as_u64(summary, "imported"), 2);

    let export_path = ws.dir.join("roundtrip.json");
    let exported = ws.run_json(["export", "--out", path_str(&export_path)]);
    assert_eq!(as_u64(&exported, "quotes"), 5);

    let body = fs::read_to_string(&export_path)
        .unwrap_or_else(|err| panic!("failed to read export {}: {err}", export_path.display()));
    let parsed: Value = serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("export is not valid JSON: {err}"));
    let items = parsed.as_array().unwrap_or_else(|| panic!("export is not an array: {parsed}"));
    assert_eq!(items.get(3), Some(&serde_json::json!({"text":"a","category":"b","author":"z"})));
    assert_eq!(items.get(4), Some(&serde_json::json!({"text":"lone"})));
}

#[test]
fn selected_category_drives_random_selection() {
    let ws = Workspace::new("qk-cli-select");
    let selected = ws.run_json(["category", "select", "Life"]);
    assert_eq!(as_str(&selected, "selected"), "Life");

    for _ in 0..5 {
        let picked = ws.run_json(["quote", "random"]);
        assert_eq!(as_str(&picked, "status"), "selected");
        let quote = picked.get("quote").unwrap_or_else(|| panic!("missing quote: {picked}"));
        assert_eq!(as_str(quote, "category"), "Life");
    }

    let listed = ws.run_json(["category", "list"]);
    assert_eq!(as_str(&listed, "selected"), "Life");
}

#[test]
fn unknown_category_selection_is_rejected() {
    let ws = Workspace::new("qk-cli-unknown");
    let output = ws.run(["category", "select", "Nope"]);
    assert!(!output.status.success());
}

#[test]
fn random_with_empty_pool_reports_the_empty_message() {
    let ws = Workspace::new("qk-cli-empty");
    let empty = ws.dir.join("empty.json");
    fs::write(&empty, "[]").unwrap_or_else(|err| panic!("failed to write fixture: {err}"));
    ws.run_json(["import", "--in", path_str(&empty)]);

    let picked = ws.run_json(["quote", "random", "--category", "Server"]);
    assert_eq!(as_str(&picked, "status"), "empty");
    assert_eq!(as_str(&picked, "message"), "no quotes available");
}

#[test]
fn last_quote_is_scoped_to_an_explicit_session() {
    let ws = Workspace::new("qk-cli-session");
    let started = ws.run_json(["session", "start"]);
    let session = as_str(&started, "session").to_string();

    let picked = ws.run_json(["--session", session.as_str(), "quote", "random"]);
    let picked_quote = picked.get("quote").cloned().unwrap_or(Value::Null);

    let last = ws.run_json(["--session", session.as_str(), "quote", "last"]);
    assert_eq!(last.get("last_quote"), Some(&picked_quote));

    let other = ws.run_json(["quote", "last"]);
    assert_eq!(other.get("last_quote"), Some(&Value::Null));

    let ended = ws.run_json(["--session", session.as_str(), "session", "end"]);
    assert_eq!(as_u64(&ended, "cleared_items"), 1);

    let after = ws.run_json(["--session", session.as_str(), "quote", "last"]);
    assert_eq!(after.get("last_quote"), Some(&Value::Null));
}

#[test]
fn sync_pull_against_unreachable_remote_reports_error_and_keeps_quotes() {
    let ws = Workspace::new("qk-cli-sync");
    let report = ws.run_json(["sync", "pull"]);
    assert!(report.get("error").and_then(Value::as_str).is_some(), "report: {report}");
    assert_eq!(as_u64(&report, "appended"), 0);

    let listed = ws.run_json(["quote", "list"]);
    assert_eq!(texts(&listed).len(), 3);
}

#[test]
fn db_commands_report_schema_and_integrity() {
    let ws = Workspace::new("qk-cli-db");
    let migrated = ws.run_json(["db", "migrate"]);
    assert_eq!(migrated.get("up_to_date").and_then(Value::as_bool), Some(true));

    let status = ws.run_json(["db", "schema-version"]);
    assert_eq!(as_u64(&status, "current_version"), 1);
    assert_eq!(status.get("up_to_date").and_then(Value::as_bool), Some(true));

    let integrity = ws.run_json(["db", "integrity-check"]);
    assert_eq!(integrity.get("quick_check_ok").and_then(Value::as_bool), Some(true));

    let backup_path = ws.dir.join("backup.sqlite3");
    let backup = ws.run_json(["db", "backup", "--out", path_str(&backup_path)]);
    assert_eq!(as_str(&backup, "status"), "ok");
    assert!(backup_path.exists());
}
