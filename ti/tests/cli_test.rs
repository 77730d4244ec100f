//! End-to-end tests for the `ti` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `ti` isolated from the user's config, data and log directories
fn ti(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("ti").expect("ti binary is built");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn setup() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let docs = dir.path().join("docs");
    fs::create_dir_all(docs.join("work")).unwrap();
    fs::write(docs.join("inbox.md"), "# Inbox\n- [ ] buy milk @errands\n- [x] call bank\n").unwrap();
    fs::write(
        docs.join("work").join("plan.md"),
        "---\nproject: Apollo\n---\n- [ ] draft roadmap due:2026-11-02\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_index_reports_counts() {
    let dir = setup();
    let db = dir.path().join("index.db");

    ti(dir.path())
        .arg("--db")
        .arg(&db)
        .args(["index", "docs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed"))
        .stdout(predicate::str::contains("Tasks:       3"));

    assert!(db.exists());
}

#[test]
fn test_tasks_json_lists_open_tasks() {
    let dir = setup();
    let db = dir.path().join("index.db");

    ti(dir.path())
        .arg("--db")
        .arg(&db)
        .args(["tasks", "docs", "--open", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("buy milk"))
        .stdout(predicate::str::contains("Apollo"))
        .stdout(predicate::str::contains("call bank").not());
}

#[test]
fn test_tasks_for_single_file() {
    let dir = setup();
    let db = dir.path().join("index.db");

    ti(dir.path())
        .arg("--db")
        .arg(&db)
        .args(["tasks", "docs", "--file", "work/plan.md"])
        .assert()
        .success()
        .stdout(predicate::str::contains("draft roadmap"))
        .stdout(predicate::str::contains("buy milk").not());
}

#[test]
fn test_stats_and_clear() {
    let dir = setup();
    let db = dir.path().join("index.db");

    ti(dir.path()).arg("--db").arg(&db).args(["index", "docs"]).assert().success();

    ti(dir.path())
        .arg("--db")
        .arg(&db)
        .args(["stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Raw records:        2"))
        .stdout(predicate::str::contains("2 files, 3 tasks"));

    ti(dir.path())
        .arg("--db")
        .arg(&db)
        .args(["clear", "--namespace", "raw"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 2 raw records"));

    ti(dir.path())
        .arg("--db")
        .arg(&db)
        .args(["stats", "-f", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"raw\": 0"));
}

#[test]
fn test_index_missing_root_fails() {
    let dir = setup();

    ti(dir.path())
        .arg("--db")
        .arg(dir.path().join("index.db"))
        .args(["index", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not a directory"));
}

#[test]
fn test_unknown_clear_namespace_is_rejected() {
    let dir = setup();

    ti(dir.path())
        .arg("--db")
        .arg(dir.path().join("index.db"))
        .args(["clear", "--namespace", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown namespace"));
}
