//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use corral_daemon::{FleetRegistry, ProcessSupervisor};
use corral_types::{DaemonConfig, ServerDefinition, ServerStatus};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A scratch directory holding the daemon config, definitions and server dirs.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("should create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Daemon config that keeps its definitions inside the workspace.
    pub fn config(&self) -> DaemonConfig {
        DaemonConfig {
            console_cache_size: 50,
            definitions_path: self.path().join("servers.toml"),
            ..DaemonConfig::default()
        }
    }

    /// Create (if needed) and return a directory under the workspace.
    pub fn dir(&self, relative: &str) -> PathBuf {
        let path = self.path().join(relative);
        std::fs::create_dir_all(&path).expect("should create server dir");
        path
    }

    /// Write a shell script into `dir`.
    pub fn script(&self, dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).expect("should write script");
    }
}

/// Definition running `command` inside `dir`.
pub fn definition(command: &str, dir: &Path) -> ServerDefinition {
    ServerDefinition::new(command, dir.to_string_lossy())
}

/// Wait until the supervisor reports `status`.
pub async fn wait_for_status(supervisor: &ProcessSupervisor, status: ServerStatus) {
    let mut rx = supervisor.watch_status();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("{} never reached {status}", supervisor.name()))
        .expect("supervisor should still be running");
}

/// Wait until a console line of `server` contains `needle`.
pub async fn wait_for_console(fleet: &FleetRegistry, server: &str, needle: &str) {
    let console = fleet.console().get(server).expect("server should exist");
    let found = tokio::time::timeout(TIMEOUT, async {
        while !console.cached_lines().iter().any(|l| l.contains(needle)) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(
        found.is_ok(),
        "{needle:?} never appeared in console of {server}: {:?}",
        console.cached_lines()
    );
}
