//! Smoke tests that invoke the `corral` binary.
//!
//! The binary must be built before running these tests:
//!   cargo build -p corral-cli && cargo test --test test_cli_smoke

mod common;

use std::path::PathBuf;
use std::sync::Once;

use assert_cmd::Command;
use predicates::prelude::*;

use common::Workspace;

static BUILD_ONCE: Once = Once::new();

/// Ensure the corral binary is built, then return its path.
fn corral_bin() -> PathBuf {
    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("tests/ should have a parent")
        .to_path_buf();

    BUILD_ONCE.call_once(|| {
        let status = std::process::Command::new(env!("CARGO"))
            .args(["build", "-p", "corral-cli"])
            .current_dir(&workspace_root)
            .status()
            .expect("failed to invoke cargo build");
        assert!(status.success(), "cargo build -p corral-cli failed");
    });

    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| workspace_root.join("target"));
    let bin = target_dir.join("debug").join("corral");
    assert!(bin.exists(), "corral binary not found at {}", bin.display());
    bin
}

/// Write a config and definitions file into the workspace.
fn write_fleet(ws: &Workspace, servers: &str) -> PathBuf {
    let config = ws.path().join("corral.toml");
    std::fs::write(
        &config,
        format!(
            "definitions_path = {:?}\n",
            ws.path().join("servers.toml").to_string_lossy()
        ),
    )
    .unwrap();
    std::fs::write(ws.path().join("servers.toml"), servers).unwrap();
    config
}

#[test]
fn validate_accepts_good_definitions() {
    let ws = Workspace::new();
    let alpha = ws.dir("alpha");
    let config = write_fleet(
        &ws,
        &format!(
            "[servers.alpha]\ncommand = \"sleep 30\"\nworkingDirectory = {:?}\n",
            alpha.to_string_lossy()
        ),
    );

    Command::new(corral_bin())
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok     alpha"));
}

#[test]
fn validate_rejects_missing_working_directory() {
    let ws = Workspace::new();
    let config = write_fleet(
        &ws,
        "[servers.ghost]\ncommand = \"sleep 30\"\nworkingDirectory = \"/corral/missing\"\n",
    );

    Command::new(corral_bin())
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stdout(predicate::str::contains("error  ghost"));
}

#[test]
fn list_prints_json() {
    let ws = Workspace::new();
    let config = write_fleet(
        &ws,
        "[servers.alpha]\ncommand = \"java -jar server.jar\"\nworkingDirectory = \"/srv/alpha\"\nrestartAttempts = 3\n",
    );

    Command::new(corral_bin())
        .args(["list", "--json", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"workingDirectory\": \"/srv/alpha\""))
        .stdout(predicate::str::contains("\"restartAttempts\": 3"));
}

#[test]
fn missing_explicit_config_fails() {
    let ws = Workspace::new();
    Command::new(corral_bin())
        .args(["list", "--config"])
        .arg(ws.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
