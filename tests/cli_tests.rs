//! E2E tests for the vitals CLI (no network)

#![allow(deprecated)] // cargo_bin deprecation - will update when assert_cmd stabilizes replacement

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn vitals() -> Command {
    let mut cmd = Command::cargo_bin("vitals").unwrap();
    cmd.env_remove("VITALS_CACHE")
        .env_remove("VITALS_CONCURRENCY")
        .env_remove("CACHE_FRESHNESS_HOURS");
    cmd
}

const EXPORT: &str = r#"{
  "roots": {
    "bookmark_bar": {
      "id": "1", "name": "Bookmarks bar", "type": "folder",
      "children": [
        {"type": "url", "id": "2", "guid": "g2", "name": "Settings", "url": "chrome://settings",
         "date_added": "13285932710000000", "date_last_used": "0"},
        {"type": "folder", "id": "3", "name": "Empty", "children": []},
        {"type": "url", "id": "4", "guid": "g4", "name": "Broken", "url": "not a url",
         "date_added": "13285932710000000", "date_last_used": "13285932720000000"}
      ]
    }
  }
}"#;

fn write_export(dir: &Path) -> String {
    let path = dir.join("Bookmarks");
    fs::write(&path, EXPORT).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_help() {
    vitals()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("unvisited"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_version() {
    vitals()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vitals"));
}

#[test]
fn test_validate_help() {
    vitals()
        .args(["validate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--concurrency"))
        .stdout(predicate::str::contains("--freshness-hours"))
        .stdout(predicate::str::contains("--force"));
}

#[test]
fn test_check_help() {
    vitals()
        .args(["check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--url"))
        .stdout(predicate::str::contains("--stdin"));
}

#[test]
fn test_check_no_args() {
    vitals()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_validate_file_not_found() {
    let dir = tempdir().unwrap();
    vitals()
        .args(["--cache", dir.path().join("c.db").to_str().unwrap()])
        .args(["validate", "nonexistent.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read file"));
}

#[test]
fn test_concurrency_validation() {
    vitals()
        .args(["validate", "--concurrency", "0", "Bookmarks"])
        .assert()
        .failure();

    vitals()
        .args(["validate", "--concurrency", "65", "Bookmarks"])
        .assert()
        .failure();
}

#[test]
fn test_validate_rejects_unknown_node_type() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Bookmarks");
    fs::write(
        &path,
        r#"{"roots": {"bookmark_bar": {"id": "1", "name": "Bar", "type": "folder",
            "children": [{"type": "widget", "id": "99", "name": "?"}]}}}"#,
    )
    .unwrap();

    vitals()
        .args(["--cache", dir.path().join("c.db").to_str().unwrap()])
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("widget"))
        .stderr(predicate::str::contains("id 99"));
}

#[test]
fn test_validate_without_checkable_urls() {
    let dir = tempdir().unwrap();
    let export = write_export(dir.path());
    let cache = dir.path().join("data").join("cache.db");

    vitals()
        .args(["--cache", cache.to_str().unwrap()])
        .args(["validate", &export])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\":0"))
        .stdout(predicate::str::contains("\"unsupported\":1"))
        .stdout(predicate::str::contains("\"invalid\":1"));

    assert!(cache.exists());
}

#[test]
fn test_stats() {
    let dir = tempdir().unwrap();
    let export = write_export(dir.path());

    vitals()
        .args(["stats", &export])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_bookmarks\":2"))
        .stdout(predicate::str::contains("\"empty_folders\":1"))
        .stdout(predicate::str::contains("\"invalid_urls\":1"));
}

#[test]
fn test_list_flat_and_unvisited() {
    let dir = tempdir().unwrap();
    let export = write_export(dir.path());

    vitals()
        .args(["list", "--flat", &export])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"folder\":\"Bookmarks bar\""));

    vitals()
        .args(["unvisited", &export])
        .assert()
        .success()
        .stdout(predicate::str::contains("chrome://settings"))
        .stdout(predicate::str::contains("not a url").not());
}

#[test]
fn test_cache_stats_on_new_cache() {
    let dir = tempdir().unwrap();
    vitals()
        .env("VITALS_CACHE", dir.path().join("c.db"))
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\":0"));
}

#[test]
fn test_cache_clear_requires_yes() {
    let dir = tempdir().unwrap();
    let cache = dir.path().join("c.db");

    vitals()
        .args(["--cache", cache.to_str().unwrap(), "cache", "clear"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));

    vitals()
        .args(["--cache", cache.to_str().unwrap(), "cache", "clear", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cleared\":0"));
}

#[test]
fn test_cache_show_missing() {
    let dir = tempdir().unwrap();
    vitals()
        .args(["--cache", dir.path().join("c.db").to_str().unwrap()])
        .args(["cache", "show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cached verdict for 42"));
}

#[test]
fn test_init_creates_and_refuses_overwrite() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("vitals.yaml");

    vitals()
        .args(["init", "--output", output.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"file\""));

    let yaml = fs::read_to_string(&output).unwrap();
    assert!(yaml.contains("freshness_hours: 168"));
    assert!(yaml.contains("docs.google.com: get_range"));

    vitals()
        .args(["init", "--output", output.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("file_exists"));

    vitals()
        .args(["init", "--force", "--output", output.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn test_invalid_config_file() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("vitals.yaml");
    fs::write(&config, "max_concurrency: 0\n").unwrap();

    vitals()
        .args(["--config", config.to_str().unwrap(), "cache", "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrency"));
}
