//! The authoritative set of managed servers.
//!
//! The fleet owns one [`ProcessSupervisor`] per server plus the canonical
//! [`DefinitionSet`]. It keeps the console registry and the file store's
//! root table in step with that set, and rewrites the definitions file after
//! every mutation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use corral_console::{BroadcastSink, ConsoleRegistry};
use corral_files::{working_directory, SandboxedFileStore};
use corral_types::{
    CorralError, DaemonConfig, DefinitionSet, Result, ServerDefinition, ServerStatus,
    ServerSummary,
};

use crate::persistence::{load_definitions, save_definitions};
use crate::supervisor::ProcessSupervisor;

#[derive(Default)]
struct FleetState {
    /// Server names in creation order.
    order: Vec<String>,
    supervisors: HashMap<String, ProcessSupervisor>,
    definitions: DefinitionSet,
}

pub struct FleetRegistry {
    state: Mutex<FleetState>,
    console: Arc<ConsoleRegistry>,
    files: Arc<SandboxedFileStore>,
    sink: Arc<dyn BroadcastSink>,
    definitions_path: PathBuf,
}

impl FleetRegistry {
    /// Create an empty fleet. Must be called inside a tokio runtime.
    pub fn new(config: &DaemonConfig, sink: Arc<dyn BroadcastSink>) -> Self {
        Self {
            state: Mutex::new(FleetState::default()),
            console: Arc::new(ConsoleRegistry::new(
                config.console_cache_size,
                Arc::clone(&sink),
            )),
            files: Arc::new(SandboxedFileStore::new()),
            sink,
            definitions_path: config.definitions_path.clone(),
        }
    }

    /// Build the fleet from the persisted definitions file.
    ///
    /// A definition that cannot be registered is logged and gets no
    /// supervisor, but stays in the definition set so the next save keeps it.
    pub fn load(config: &DaemonConfig, sink: Arc<dyn BroadcastSink>) -> Result<Self> {
        let mut fleet = Self::new(config, sink);
        let definitions = load_definitions(&config.definitions_path)?;

        let mut state = FleetState::default();
        for (name, definition) in definitions.servers {
            match fleet.register(&mut state, &name, definition.clone()) {
                Ok(()) => info!(server = %name, "loaded server"),
                Err(e) => {
                    error!(server = %name, error = %e, "skipping server definition");
                    state.definitions.servers.insert(name, definition);
                }
            }
        }
        *fleet.state.get_mut() = state;
        Ok(fleet)
    }

    /// Validate and wire up one server. Nothing changes if this fails.
    fn register(&self, state: &mut FleetState, name: &str, definition: ServerDefinition) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CorralError::InvalidInput("server name cannot be blank".into()));
        }
        definition.validate()?;
        if state.supervisors.contains_key(name) {
            return Err(CorralError::Conflict(format!("server {name} already exists")));
        }

        self.files.add_server_directories(name, &definition)?;
        let console = self.console.add(name);
        let supervisor = ProcessSupervisor::spawn(
            name,
            definition.clone(),
            console,
            Arc::clone(&self.sink),
        );

        state.order.push(name.to_string());
        state.supervisors.insert(name.to_string(), supervisor);
        state.definitions.servers.insert(name.to_string(), definition);
        Ok(())
    }

    fn persist(&self, state: &FleetState) -> Result<()> {
        save_definitions(&self.definitions_path, &state.definitions).inspect_err(|e| {
            error!(path = %self.definitions_path.display(), error = %e, "failed to persist server definitions");
        })
    }

    /// Add a new managed server and persist the fleet.
    pub async fn create(&self, name: &str, definition: ServerDefinition) -> Result<()> {
        let mut state = self.state.lock().await;
        self.register(&mut state, name, definition)?;
        info!(server = %name, "created server");
        self.persist(&state)
    }

    /// Remove an offline server and persist the fleet.
    ///
    /// A definition skipped at load time can be removed too.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(supervisor) = state.supervisors.get(name).cloned() else {
            if state.definitions.servers.remove(name).is_none() {
                return Err(CorralError::ServerNotFound(name.to_string()));
            }
            info!(server = %name, "removed unloaded server definition");
            return self.persist(&state);
        };
        // refused by the actor while a process is running
        supervisor.retire().await?;

        state.supervisors.remove(name);
        state.order.retain(|n| n != name);
        state.definitions.servers.remove(name);
        self.console.remove(name);
        self.files.remove_server_directories(name);
        info!(server = %name, "removed server");
        self.persist(&state)
    }

    /// Replace the definition of an offline server and persist the fleet.
    pub async fn update(&self, name: &str, definition: ServerDefinition) -> Result<()> {
        definition.validate()?;
        let mut state = self.state.lock().await;
        let supervisor = state
            .supervisors
            .get(name)
            .cloned()
            .ok_or_else(|| CorralError::ServerNotFound(name.to_string()))?;
        if supervisor.is_online() {
            return Err(CorralError::MethodNotAllowed(format!(
                "server {name} must be offline to be updated"
            )));
        }

        working_directory(&definition.working_directory)?;
        supervisor.reconfigure(definition.clone()).await?;
        self.files.update_server_directories(name, &definition)?;
        state.definitions.servers.insert(name.to_string(), definition);
        info!(server = %name, "updated server");
        self.persist(&state)
    }

    /// Name and status of every server, in creation order.
    pub async fn list(&self) -> Vec<ServerSummary> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|name| {
                state.supervisors.get(name).map(|s| ServerSummary {
                    name: name.clone(),
                    status: s.status(),
                })
            })
            .collect()
    }

    pub async fn definition(&self, name: &str) -> Result<ServerDefinition> {
        self.state
            .lock()
            .await
            .definitions
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| CorralError::ServerNotFound(name.to_string()))
    }

    pub async fn supervisor(&self, name: &str) -> Result<ProcessSupervisor> {
        self.state
            .lock()
            .await
            .supervisors
            .get(name)
            .cloned()
            .ok_or_else(|| CorralError::ServerNotFound(name.to_string()))
    }

    pub async fn status(&self, name: &str) -> Result<ServerStatus> {
        Ok(self.supervisor(name).await?.status())
    }

    pub async fn start_server(&self, name: &str) -> Result<()> {
        self.supervisor(name).await?.start().await
    }

    pub async fn stop_server(&self, name: &str) -> Result<()> {
        self.supervisor(name).await?.stop().await
    }

    pub async fn kill_server(&self, name: &str) -> Result<()> {
        self.supervisor(name).await?.kill().await
    }

    pub async fn restart_server(&self, name: &str) -> Result<()> {
        self.supervisor(name).await?.restart().await
    }

    pub fn console(&self) -> &Arc<ConsoleRegistry> {
        &self.console
    }

    pub fn files(&self) -> &Arc<SandboxedFileStore> {
        &self.files
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ask every server to stop without waiting for any of them.
    pub async fn shutdown(&self) {
        let state = self.state.lock().await;
        for name in &state.order {
            if let Some(supervisor) = state.supervisors.get(name) {
                if supervisor.is_online() {
                    warn!(server = %name, "stopping server for shutdown");
                }
                supervisor.request_stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use corral_console::MemorySink;

    use super::*;

    struct Harness {
        dir: tempfile::TempDir,
        config: DaemonConfig,
        sink: Arc<MemorySink>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = DaemonConfig {
                definitions_path: dir.path().join("servers.toml"),
                ..DaemonConfig::default()
            };
            Self {
                dir,
                config,
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn server_dir(&self, name: &str) -> String {
            let path = self.dir.path().join(name);
            std::fs::create_dir_all(&path).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn fleet(&self) -> FleetRegistry {
            FleetRegistry::new(&self.config, self.sink.clone())
        }
    }

    #[tokio::test]
    async fn create_persists_and_lists_in_order() {
        let h = Harness::new();
        let fleet = h.fleet();
        fleet
            .create("zeta", ServerDefinition::new("sleep 30", h.server_dir("zeta")))
            .await
            .unwrap();
        fleet
            .create("alpha", ServerDefinition::new("sleep 30", h.server_dir("alpha")))
            .await
            .unwrap();

        let names: Vec<_> = fleet.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let saved = load_definitions(&h.config.definitions_path).unwrap();
        assert_eq!(saved.servers.len(), 2);
        assert!(fleet.console().get("alpha").is_ok());
        assert!(fleet.files().roots("alpha").is_ok());
    }

    #[tokio::test]
    async fn create_rejects_bad_input_without_changes() {
        let h = Harness::new();
        let fleet = h.fleet();
        let dir = h.server_dir("alpha");

        assert!(matches!(
            fleet.create("  ", ServerDefinition::new("sleep 30", dir.clone())).await,
            Err(CorralError::InvalidInput(_))
        ));
        assert!(matches!(
            fleet.create("alpha", ServerDefinition::new(" ", dir.clone())).await,
            Err(CorralError::InvalidInput(_))
        ));
        let missing = h.dir.path().join("missing").to_string_lossy().into_owned();
        assert!(matches!(
            fleet.create("alpha", ServerDefinition::new("sleep 30", missing)).await,
            Err(CorralError::InvalidPath(_))
        ));

        assert!(fleet.is_empty().await);
        assert!(fleet.console().is_empty());
        assert!(!h.config.definitions_path.exists());
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let h = Harness::new();
        let fleet = h.fleet();
        let def = ServerDefinition::new("sleep 30", h.server_dir("alpha"));
        fleet.create("alpha", def.clone()).await.unwrap();
        assert!(matches!(
            fleet.create("alpha", def).await,
            Err(CorralError::Conflict(_))
        ));
        assert_eq!(fleet.len().await, 1);
    }

    #[tokio::test]
    async fn online_servers_cannot_be_removed_or_updated() {
        let h = Harness::new();
        let fleet = h.fleet();
        let def = ServerDefinition::new("sleep 30", h.server_dir("alpha"));
        fleet.create("alpha", def.clone()).await.unwrap();
        fleet.start_server("alpha").await.unwrap();

        assert!(matches!(
            fleet.remove("alpha").await,
            Err(CorralError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            fleet.update("alpha", def).await,
            Err(CorralError::MethodNotAllowed(_))
        ));

        fleet.kill_server("alpha").await.unwrap();
        let mut rx = fleet.supervisor("alpha").await.unwrap().watch_status();
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == ServerStatus::Offline))
            .await
            .unwrap()
            .unwrap();

        fleet.remove("alpha").await.unwrap();
        assert!(fleet.is_empty().await);
        assert!(matches!(
            fleet.files().roots("alpha"),
            Err(CorralError::ServerNotFound(_))
        ));
        assert!(load_definitions(&h.config.definitions_path)
            .unwrap()
            .servers
            .is_empty());
    }

    #[tokio::test]
    async fn update_replaces_definition_and_roots() {
        let h = Harness::new();
        let fleet = h.fleet();
        fleet
            .create("alpha", ServerDefinition::new("sleep 30", h.server_dir("alpha")))
            .await
            .unwrap();

        let mut def = ServerDefinition::new("sleep 5", h.server_dir("alpha"));
        def.extra_directories.push(h.server_dir("backups"));
        fleet.update("alpha", def.clone()).await.unwrap();

        assert_eq!(fleet.definition("alpha").await.unwrap(), def);
        assert_eq!(fleet.files().roots("alpha").unwrap().len(), 2);
        let saved = load_definitions(&h.config.definitions_path).unwrap();
        assert_eq!(saved.servers["alpha"], def);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_memory_state() {
        let mut h = Harness::new();
        let blocker = h.dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        h.config.definitions_path = blocker.join("servers.toml");

        let fleet = h.fleet();
        let err = fleet
            .create("alpha", ServerDefinition::new("sleep 30", h.server_dir("alpha")))
            .await
            .unwrap_err();
        assert!(err.is_internal());
        assert_eq!(fleet.len().await, 1);
    }

    #[tokio::test]
    async fn load_skips_unusable_definitions() {
        let h = Harness::new();
        let mut set = DefinitionSet::default();
        set.servers.insert(
            "alpha".into(),
            ServerDefinition::new("sleep 30", h.server_dir("alpha")),
        );
        set.servers.insert(
            "ghost".into(),
            ServerDefinition::new("sleep 30", "/corral/does/not/exist"),
        );
        save_definitions(&h.config.definitions_path, &set).unwrap();

        let fleet = FleetRegistry::load(&h.config, h.sink.clone()).unwrap();
        let names: Vec<_> = fleet.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha"]);
    }

    #[tokio::test]
    async fn skipped_definitions_survive_later_saves() {
        let h = Harness::new();
        let mut set = DefinitionSet::default();
        set.servers.insert(
            "alpha".into(),
            ServerDefinition::new("sleep 30", h.server_dir("alpha")),
        );
        set.servers.insert(
            "beta".into(),
            ServerDefinition::new("sleep 30", "/corral/unmounted/beta"),
        );
        save_definitions(&h.config.definitions_path, &set).unwrap();

        let fleet = FleetRegistry::load(&h.config, h.sink.clone()).unwrap();
        fleet
            .create("gamma", ServerDefinition::new("sleep 30", h.server_dir("gamma")))
            .await
            .unwrap();

        let saved = load_definitions(&h.config.definitions_path).unwrap();
        let names: Vec<_> = saved.servers.keys().cloned().collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(fleet.len().await, 2);

        // the dormant entry can still be dropped explicitly
        fleet.remove("beta").await.unwrap();
        let saved = load_definitions(&h.config.definitions_path).unwrap();
        assert!(!saved.servers.contains_key("beta"));
    }

    #[tokio::test]
    async fn removed_server_cannot_be_started_through_old_handle() {
        let h = Harness::new();
        let fleet = h.fleet();
        fleet
            .create("alpha", ServerDefinition::new("sleep 30", h.server_dir("alpha")))
            .await
            .unwrap();
        let handle = fleet.supervisor("alpha").await.unwrap();

        fleet.remove("alpha").await.unwrap();
        assert!(matches!(
            handle.start().await,
            Err(CorralError::ServerNotFound(_))
        ));
        assert_eq!(handle.status(), ServerStatus::Offline);
        assert!(fleet.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_server_operations() {
        let h = Harness::new();
        let fleet = h.fleet();
        assert!(matches!(
            fleet.start_server("ghost").await,
            Err(CorralError::ServerNotFound(_))
        ));
        assert!(matches!(
            fleet.remove("ghost").await,
            Err(CorralError::ServerNotFound(_))
        ));
        assert!(fleet.definition("ghost").await.is_err());
    }
}
