//! The corral daemon: supervises a fleet of external server processes.
//!
//! # Architecture
//!
//! - [`crash::CrashTracker`]: decaying crash counter behind automatic restarts
//! - [`supervisor::ProcessSupervisor`]: one actor per server owning its child process
//! - [`fleet::FleetRegistry`]: the server set, kept in step with consoles, file roots
//!   and the definitions file
//! - [`DaemonRuntime`]: wires the fleet to a broadcast channel for observers

pub mod crash;
pub mod fleet;
pub mod persistence;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use corral_console::{Broadcast, ChannelSink};
use corral_types::{DaemonConfig, Result};

pub use crash::{CrashTracker, RestartDecision};
pub use fleet::FleetRegistry;
pub use supervisor::ProcessSupervisor;

/// A loaded fleet plus the broadcast channel its events go to.
pub struct DaemonRuntime {
    config: DaemonConfig,
    sink: Arc<ChannelSink>,
    fleet: FleetRegistry,
}

impl DaemonRuntime {
    /// Load the fleet described by `config`. Must be called inside a tokio runtime.
    pub fn start(config: DaemonConfig) -> Result<Self> {
        let sink = Arc::new(ChannelSink::new(config.broadcast_capacity));
        let fleet = FleetRegistry::load(&config, sink.clone())?;
        info!(
            definitions = %config.definitions_path.display(),
            "daemon runtime started"
        );
        Ok(Self {
            config,
            sink,
            fleet,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn fleet(&self) -> &FleetRegistry {
        &self.fleet
    }

    /// Observe every status and console event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.sink.subscribe()
    }

    /// Ask every server to stop, wait up to `grace` for them to go offline,
    /// then tear down the console tasks.
    pub async fn shutdown(&self, grace: Duration) {
        info!("daemon shutting down");
        self.fleet.shutdown().await;

        let deadline = tokio::time::Instant::now() + grace;
        while self.fleet.list().await.iter().any(|s| s.status.is_online()) {
            if tokio::time::Instant::now() >= deadline {
                warn!(grace_secs = grace.as_secs(), "servers still running after shutdown grace period");
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.fleet.console().shutdown();
    }
}
