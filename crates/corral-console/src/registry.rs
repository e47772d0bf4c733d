//! Name-keyed collection of console bridges, one per managed server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use corral_types::{CorralError, Result};

use crate::bridge::ConsoleBridge;
use crate::sink::BroadcastSink;

/// Owns the console bridge of every managed server.
///
/// The set of consoles mirrors the fleet: the fleet adds a console when a
/// server is created and removes it when the server is removed.
pub struct ConsoleRegistry {
    consoles: RwLock<HashMap<String, Arc<ConsoleBridge>>>,
    cache_size: usize,
    sink: Arc<dyn BroadcastSink>,
}

impl ConsoleRegistry {
    /// Create an empty registry whose consoles retain `cache_size` lines each.
    pub fn new(cache_size: usize, sink: Arc<dyn BroadcastSink>) -> Self {
        Self {
            consoles: RwLock::new(HashMap::new()),
            cache_size,
            sink,
        }
    }

    /// Create (or replace) the console for `server` and return it.
    pub fn add(&self, server: &str) -> Arc<ConsoleBridge> {
        let bridge = Arc::new(ConsoleBridge::new(
            server,
            self.cache_size,
            Arc::clone(&self.sink),
        ));
        let previous = self
            .consoles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server.to_string(), Arc::clone(&bridge));
        if previous.is_some() {
            debug!(server, "replaced existing console");
        }
        bridge
    }

    /// Drop the console for `server`, stopping its tasks.
    pub fn remove(&self, server: &str) {
        let removed = self
            .consoles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server);
        if let Some(bridge) = removed {
            bridge.shutdown();
        }
    }

    /// Look up the console for `server`.
    pub fn get(&self, server: &str) -> Result<Arc<ConsoleBridge>> {
        self.consoles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(server)
            .cloned()
            .ok_or_else(|| CorralError::ServerNotFound(server.to_string()))
    }

    /// Replay snapshot of the console of `server`.
    pub fn console_text(&self, server: &str) -> Result<Vec<String>> {
        Ok(self.get(server)?.cached_lines())
    }

    /// Send a command line to the process of `server`.
    pub fn write_to_console(&self, server: &str, command: &str) -> Result<()> {
        if command.trim().is_empty() {
            return Err(CorralError::InvalidInput("the command cannot be blank".into()));
        }
        self.get(server)?.write_message(command);
        Ok(())
    }

    /// Add a supervisor message to the console of `server`.
    pub fn log_manager_message(&self, server: &str, message: &str) -> Result<()> {
        self.get(server)?.log_manager_message(message);
        Ok(())
    }

    /// Stop the reader/writer tasks of every console.
    pub fn shutdown(&self) {
        for bridge in self
            .consoles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            bridge.shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.consoles.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
