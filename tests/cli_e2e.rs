//! End-to-end CLI tests for the arxiv-mirror binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary invocation isolated from the user's config file.
fn mirror_cmd(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("arxiv-mirror").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    mirror_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Maintain a local arXiv mirror"))
        .stdout(predicate::str::contains("rebuild-citations"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    mirror_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("arxiv-mirror"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let home = TempDir::new().unwrap();
    mirror_cmd(&home).assert().failure().code(2);
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    mirror_cmd(&home)
        .args(["stats", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_stats_on_fresh_root_prints_json() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    mirror_cmd(&home)
        .args(["-q", "stats", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"papers\": 0"))
        .stdout(predicate::str::contains("\"sync_pending\": false"));
    assert!(root.path().join("index.db").exists());
}

#[test]
fn test_categories_on_fresh_root_is_empty_list() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    mirror_cmd(&home)
        .args(["-q", "categories", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_show_unknown_paper_fails() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    mirror_cmd(&home)
        .args(["-q", "show", "2401.00001", "--root"])
        .arg(root.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("paper not found: 2401.00001"));
}

#[test]
fn test_malformed_id_is_rejected_by_parser() {
    let home = TempDir::new().unwrap();
    mirror_cmd(&home)
        .args(["show", "not-an-id"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_config_file_sets_root() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let config_dir = home.path().join("arxiv-mirror");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        format!("root = {:?}\n", root.path().join("from-config")),
    )
    .unwrap();

    mirror_cmd(&home).args(["-q", "stats"]).assert().success();
    assert!(root.path().join("from-config/index.db").exists());
}

#[test]
fn test_invalid_config_file_fails() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let config = home.path().join("bad.toml");
    std::fs::write(&config, "concurrency = 0\n").unwrap();

    mirror_cmd(&home)
        .args(["-q", "stats", "--root"])
        .arg(root.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config file"));
}

#[test]
fn test_rebuild_fts_on_empty_mirror() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    mirror_cmd(&home)
        .args(["-q", "rebuild-fts", "--root"])
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"indexed\": 0"));
}
