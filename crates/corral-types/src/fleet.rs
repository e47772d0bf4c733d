//! Configuration and status types for the corral daemon.
//!
//! The daemon supervises a fleet of external server processes. These types
//! define the daemon's own configuration file, the persisted definition set
//! (one entry per managed server), and the runtime status reported for each
//! server.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};

/// Lifecycle status of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    /// No process; either never started or shut down cleanly.
    Offline,
    /// A process is running.
    Online,
    /// The last process exited abnormally.
    Crashed,
    /// A replacement process is being spawned.
    Restarting,
}

impl ServerStatus {
    /// Whether a process is (or is about to be) owned in this status.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online | Self::Restarting)
    }

    /// Upper-case name published on the status topic.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Online => "ONLINE",
            Self::Crashed => "CRASHED",
            Self::Restarting => "RESTARTING",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automatic restart budget applied when a server crashes.
///
/// Crashes closer together than `crash_window_ms` accumulate towards
/// `max_attempts`; a crash after a quieter period starts counting from one
/// again. `max_attempts == 0` disables automatic restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    #[serde(rename = "timeBetweenCrashesMs", default)]
    pub crash_window_ms: u64,
    #[serde(rename = "restartAttempts", default)]
    pub max_attempts: u32,
}

/// Persisted definition of one managed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinition {
    /// Raw command line, tokenized with [`crate::command::tokenize`].
    pub command: String,
    /// Directory the process runs in; also the first file-store root.
    pub working_directory: String,
    /// Additional file-store roots, in order.
    #[serde(default)]
    pub extra_directories: Vec<String>,
    #[serde(flatten)]
    pub restart: RestartPolicy,
}

impl ServerDefinition {
    /// Create a definition with no extra directories and restarts disabled.
    pub fn new(command: impl Into<String>, working_directory: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_directory: working_directory.into(),
            extra_directories: Vec::new(),
            restart: RestartPolicy::default(),
        }
    }

    /// Reject definitions that could never be started.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(CorralError::InvalidInput("command cannot be blank".into()));
        }
        if self.working_directory.trim().is_empty() {
            return Err(CorralError::InvalidInput(
                "working directory cannot be blank".into(),
            ));
        }
        Ok(())
    }
}

/// The full set of server definitions, keyed by server name.
///
/// Rewritten wholesale on every fleet mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSet {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerDefinition>,
}

impl DefinitionSet {
    /// Parse a definition set from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CorralError::Config(format!("invalid server definitions: {e}")))
    }

    /// Serialize the definition set to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CorralError::Config(format!("failed to serialize definitions: {e}")))
    }
}

/// Name and status of one server, as listed by the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub name: String,
    pub status: ServerStatus,
}

/// Top-level daemon configuration, loaded from `corral.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Number of console lines retained per server for replay.
    #[serde(default = "default_console_cache_size")]
    pub console_cache_size: usize,
    /// Where the definition set is persisted.
    #[serde(default = "default_definitions_path")]
    pub definitions_path: PathBuf,
    /// Buffer size of the broadcast channel for status and console events.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_console_cache_size() -> usize {
    500
}

fn default_definitions_path() -> PathBuf {
    PathBuf::from("servers.toml")
}

fn default_broadcast_capacity() -> usize {
    1024
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            console_cache_size: default_console_cache_size(),
            definitions_path: default_definitions_path(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Default daemon config file name, looked up in the current directory.
pub const CONFIG_FILENAME: &str = "corral.toml";

impl DaemonConfig {
    /// Parse a daemon configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CorralError::Config(format!("invalid daemon config: {e}")))?;

        if config.console_cache_size == 0 {
            return Err(CorralError::Config(
                "console_cache_size must be at least 1".into(),
            ));
        }
        if config.broadcast_capacity == 0 {
            return Err(CorralError::Config(
                "broadcast_capacity must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CorralError::Config(format!("failed to serialize config: {e}")))
    }

    /// Load the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CorralError::io_at("read", path, e)),
        }
    }
}
