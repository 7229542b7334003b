//! End-to-end CLI tests for the harvester binary.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod support;
use support::fixtures::{listing_descriptor, mount_article, mount_listing};
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--source"))
        .stdout(predicate::str::contains("--count"));
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

/// Test that no sources is a successful no-op.
#[test]
fn test_binary_without_sources_returns_zero() {
    let output = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("-o")
        .arg(output.path().join("out"))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(!output.path().join("out").exists());
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_count_out_of_range_rejected() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["--source", "news", "--count", "0"])
        .assert()
        .failure();
}

#[test]
fn test_list_sources_shows_builtins_and_groups() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--list-sources")
        .assert()
        .success()
        .stdout(predicate::str::contains("hackernews"))
        .stdout(predicate::str::contains("comments"))
        .stdout(predicate::str::contains("Groups:"))
        .stdout(predicate::str::contains("tech"));
}

#[test]
fn test_unknown_source_is_fatal() {
    let output = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["-q", "--source", "no-such-source", "-o"])
        .arg(output.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no-such-source"));
}

#[test]
fn test_malformed_config_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("harvest.json");
    std::fs::write(&config, "{ \"concurrency\": ").unwrap();

    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["-q", "--source", "news", "--config"])
        .arg(&config)
        .assert()
        .code(1);
}

#[test]
fn test_config_out_of_range_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("harvest.json");
    std::fs::write(&config, r#"{ "concurrency": 0 }"#).unwrap();

    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["-q", "--source", "news", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("concurrency"));
}

/// A full run against a mock site loaded from --sources-dir prints the
/// JSON report and writes the bundle.
#[tokio::test(flavor = "multi_thread")]
async fn test_sources_dir_run_prints_report() {
    let mock_server = require_mock_server!();
    let paths = mount_listing(&mock_server, "local", 2).await;
    for (n, article_path) in paths.iter().enumerate() {
        mount_article(&mock_server, article_path, &format!("Local {n}")).await;
    }

    let sources = TempDir::new().unwrap();
    std::fs::write(
        sources.path().join("local.json"),
        serde_json::to_string(&listing_descriptor(&mock_server, "local")).unwrap(),
    )
    .unwrap();
    let config = sources.path().join("config.json");
    std::fs::write(&config, r#"{ "rate_limit": false, "retry_base_delay_ms": 0 }"#).unwrap();
    let output = TempDir::new().unwrap();
    let sources_dir = sources.path().to_path_buf();
    let output_dir = output.path().to_path_buf();

    let assert = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("harvester")
            .unwrap()
            .args(["-q", "--source", "local", "--count", "2"])
            .arg("--sources-dir")
            .arg(&sources_dir)
            .arg("--config")
            .arg(&config)
            .arg("-o")
            .arg(&output_dir)
            .assert()
    })
    .await
    .unwrap();

    let assert = assert.success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["results"].as_array().unwrap().len(), 2);
    assert_eq!(report["results"][0]["status"], "success");
    assert_eq!(report["sources"][0]["source_id"], "local");
    assert!(output.path().join("local/001-story-1/article.md").is_file());
    assert!(output.path().join("local/002-story-2/result.json").is_file());
}

/// A writable --history-db gains a row per source; an unwritable one only
/// logs a warning and the run still succeeds.
#[tokio::test(flavor = "multi_thread")]
async fn test_history_db_recorded_and_failure_non_fatal() {
    let mock_server = require_mock_server!();
    let paths = mount_listing(&mock_server, "local", 1).await;
    mount_article(&mock_server, &paths[0], "Local 0").await;

    let sources = TempDir::new().unwrap();
    std::fs::write(
        sources.path().join("local.json"),
        serde_json::to_string(&listing_descriptor(&mock_server, "local")).unwrap(),
    )
    .unwrap();
    let config = sources.path().join("config.json");
    std::fs::write(&config, r#"{ "rate_limit": false, "retry_base_delay_ms": 0 }"#).unwrap();
    let history_db = sources.path().join("history.db");
    let unwritable_db = sources.path().join("missing").join("history.db");

    for db in [history_db.clone(), unwritable_db.clone()] {
        let output = TempDir::new().unwrap();
        let sources_dir = sources.path().to_path_buf();
        let config = config.clone();
        let assert = tokio::task::spawn_blocking(move || {
            Command::cargo_bin("harvester")
                .unwrap()
                .args(["--source", "local", "--count", "1"])
                .arg("--sources-dir")
                .arg(&sources_dir)
                .arg("--config")
                .arg(&config)
                .arg("--history-db")
                .arg(&db)
                .arg("-o")
                .arg(output.path())
                .assert()
        })
        .await
        .unwrap();
        assert.success();
    }

    assert!(history_db.is_file());
    assert!(!unwritable_db.exists());
    let history = harvester_core::MetricsHistory::open(&history_db).await.unwrap();
    let rows = history.recent("local", 5).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].successes, 1);
    history.close().await;
}
