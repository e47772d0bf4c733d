//! Per-server process supervision.
//!
//! Each managed server gets one actor task that exclusively owns its state:
//! status, the current child process, the stop/restart flags and the crash
//! tracker. Callers talk to it through a cloneable [`ProcessSupervisor`]
//! handle; every command carries a oneshot reply. The child's exit arrives on
//! the same channel from a dedicated wait task, so transitions are applied
//! one at a time and never race a second spawn.

use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use corral_console::{status_topic, BroadcastSink, ConsoleBridge, ProcessStreams};
use corral_types::{tokenize, CorralError, Result, ServerDefinition, ServerStatus};

use crate::crash::{CrashTracker, RestartDecision};

/// Requests a caller can make of a supervisor.
#[derive(Debug)]
enum SupervisorCommand {
    Start,
    Stop,
    Kill,
    Restart,
    Reconfigure(ServerDefinition),
    Retire,
}

/// Everything the actor receives, in arrival order.
enum SupervisorMessage {
    Command {
        command: SupervisorCommand,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Posted by the wait task of spawn number `generation`.
    Exited {
        generation: u64,
        exit_code: Option<i32>,
    },
}

/// Handle to the supervisor actor of one managed server.
#[derive(Clone)]
pub struct ProcessSupervisor {
    name: String,
    tx: mpsc::UnboundedSender<SupervisorMessage>,
    status_rx: watch::Receiver<ServerStatus>,
}

impl ProcessSupervisor {
    /// Spawn the actor for `name`. Must be called inside a tokio runtime.
    pub fn spawn(
        name: &str,
        definition: ServerDefinition,
        console: Arc<ConsoleBridge>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ServerStatus::Offline);

        let actor = SupervisorActor {
            name: name.to_string(),
            definition,
            process: None,
            generation: 0,
            stop_requested: false,
            restart_requested: false,
            retired: false,
            crashes: CrashTracker::new(),
            console,
            sink,
            status_tx,
            events: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            name: name.to_string(),
            tx,
            status_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub fn status(&self) -> ServerStatus {
        *self.status_rx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ServerStatus> {
        self.status_rx.clone()
    }

    /// Spawn the process. Fails with `Conflict` if one is already running.
    pub async fn start(&self) -> Result<()> {
        self.request(SupervisorCommand::Start).await
    }

    /// Ask the process to terminate gracefully. Returns once signalled.
    pub async fn stop(&self) -> Result<()> {
        self.request(SupervisorCommand::Stop).await
    }

    /// Terminate the process forcefully. Returns once signalled.
    pub async fn kill(&self) -> Result<()> {
        self.request(SupervisorCommand::Kill).await
    }

    /// Stop the process and start a new one once it has exited.
    pub async fn restart(&self) -> Result<()> {
        self.request(SupervisorCommand::Restart).await
    }

    /// Replace the definition. Refused while the server is online.
    pub async fn reconfigure(&self, definition: ServerDefinition) -> Result<()> {
        self.request(SupervisorCommand::Reconfigure(definition)).await
    }

    /// Detach the supervisor from the fleet. Refused while a process is
    /// running; afterwards every start, restart or reconfigure through any
    /// handle fails with `ServerNotFound`.
    pub async fn retire(&self) -> Result<()> {
        self.request(SupervisorCommand::Retire).await
    }

    /// Queue a graceful stop without waiting for it to be handled.
    pub fn request_stop(&self) {
        let (reply, _) = oneshot::channel();
        let message = SupervisorMessage::Command {
            command: SupervisorCommand::Stop,
            reply,
        };
        if self.tx.send(message).is_err() {
            debug!(server = %self.name, "supervisor already stopped");
        }
    }

    async fn request(&self, command: SupervisorCommand) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(SupervisorMessage::Command { command, reply })
            .map_err(|_| CorralError::ServerNotFound(self.name.clone()))?;
        reply_rx
            .await
            .map_err(|_| CorralError::ServerNotFound(self.name.clone()))?
    }
}

/// The child currently owned by a supervisor.
struct ProcessHandle {
    pid: Option<u32>,
    generation: u64,
}

struct SupervisorActor {
    name: String,
    definition: ServerDefinition,
    process: Option<ProcessHandle>,
    /// Incremented on every successful spawn.
    generation: u64,
    stop_requested: bool,
    restart_requested: bool,
    /// Set once the server has been removed from the fleet.
    retired: bool,
    crashes: CrashTracker,
    console: Arc<ConsoleBridge>,
    sink: Arc<dyn BroadcastSink>,
    status_tx: watch::Sender<ServerStatus>,
    /// Weak so the actor ends once every handle and wait task is gone.
    events: mpsc::WeakUnboundedSender<SupervisorMessage>,
}

impl SupervisorActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SupervisorMessage>) {
        debug!(server = %self.name, "supervisor started");
        while let Some(message) = rx.recv().await {
            match message {
                SupervisorMessage::Command { command, reply } => {
                    let result = self.handle_command(command);
                    // the caller may have stopped waiting
                    let _ = reply.send(result);
                }
                SupervisorMessage::Exited {
                    generation,
                    exit_code,
                } => self.handle_exit(generation, exit_code),
            }
        }
        debug!(server = %self.name, "supervisor stopped");
    }

    fn status(&self) -> ServerStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: ServerStatus) {
        let previous = self.status_tx.send_replace(status);
        debug!(server = %self.name, from = %previous, to = %status, "status changed");
        self.sink.publish(&status_topic(&self.name), status.as_str());
    }

    fn manager_message(&self, message: &str) {
        self.console.log_manager_message(message);
    }

    fn handle_command(&mut self, command: SupervisorCommand) -> Result<()> {
        if self.retired
            && matches!(
                command,
                SupervisorCommand::Start
                    | SupervisorCommand::Restart
                    | SupervisorCommand::Reconfigure(_)
                    | SupervisorCommand::Retire
            )
        {
            return Err(CorralError::ServerNotFound(self.name.clone()));
        }
        match command {
            SupervisorCommand::Start => self.start(),
            SupervisorCommand::Stop => {
                if self.process.is_none() {
                    return Ok(());
                }
                self.stop_requested = true;
                self.manager_message(&format!("Stopping server {}.", self.name));
                self.signal(Signal::SIGTERM)
            }
            SupervisorCommand::Kill => {
                if self.process.is_none() {
                    return Ok(());
                }
                self.stop_requested = true;
                self.manager_message(&format!("Killing server {}.", self.name));
                self.signal(Signal::SIGKILL)
            }
            SupervisorCommand::Restart => {
                if self.process.is_none() {
                    return Ok(());
                }
                self.restart_requested = true;
                self.manager_message(&format!("Restarting server {}.", self.name));
                self.signal(Signal::SIGTERM)
            }
            SupervisorCommand::Reconfigure(definition) => {
                if self.status().is_online() {
                    return Err(CorralError::MethodNotAllowed(format!(
                        "server {} must be offline to be reconfigured",
                        self.name
                    )));
                }
                self.definition = definition;
                debug!(server = %self.name, "definition replaced");
                Ok(())
            }
            SupervisorCommand::Retire => {
                if self.process.is_some() {
                    return Err(CorralError::MethodNotAllowed(format!(
                        "server {} must be offline to be removed",
                        self.name
                    )));
                }
                self.retired = true;
                debug!(server = %self.name, "supervisor retired");
                Ok(())
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.status().is_online() || self.process.is_some() {
            return Err(CorralError::Conflict(format!(
                "server {} is already running",
                self.name
            )));
        }
        self.spawn_process()
    }

    fn spawn_process(&mut self) -> Result<()> {
        let tokens = tokenize(&self.definition.command);
        let Some((program, args)) = tokens.split_first() else {
            return Err(CorralError::ProcessSpawn(format!(
                "server {} has an empty command",
                self.name
            )));
        };

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.definition.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(server = %self.name, program = %program, error = %e, "failed to spawn process");
                CorralError::ProcessSpawn(format!("{program}: {e}"))
            })?;

        self.generation += 1;
        let generation = self.generation;
        let pid = child.id();
        self.process = Some(ProcessHandle { pid, generation });
        self.stop_requested = false;
        self.restart_requested = false;

        self.manager_message(&format!("Starting server {}.", self.name));
        self.console.process_start(ProcessStreams::from_child(&mut child));
        self.set_status(ServerStatus::Online);
        info!(server = %self.name, pid, generation, "process started");

        tokio::spawn(wait_for_exit(
            self.name.clone(),
            child,
            generation,
            self.events.upgrade(),
        ));
        Ok(())
    }

    fn signal(&self, signal: Signal) -> Result<()> {
        let Some(pid) = self.process.as_ref().and_then(|p| p.pid) else {
            return Ok(());
        };
        let raw = i32::try_from(pid)
            .map_err(|_| CorralError::ProcessSignal(format!("pid {pid} is out of range")))?;

        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => {
                debug!(server = %self.name, pid, ?signal, "signalled process");
                Ok(())
            }
            // exited already; the wait task will report it
            Err(Errno::ESRCH) => {
                debug!(server = %self.name, pid, ?signal, "process already gone");
                Ok(())
            }
            Err(e) => {
                error!(server = %self.name, pid, ?signal, error = %e, "failed to signal process");
                Err(CorralError::ProcessSignal(format!("{signal:?} to pid {pid}: {e}")))
            }
        }
    }

    fn handle_exit(&mut self, generation: u64, exit_code: Option<i32>) {
        if self.process.as_ref().map(|p| p.generation) != Some(generation) {
            debug!(server = %self.name, generation, "ignoring exit of stale process");
            return;
        }
        self.process = None;
        self.console.process_stop();
        info!(server = %self.name, ?exit_code, "process exited");

        if self.restart_requested {
            self.restart_requested = false;
            self.try_restart();
            return;
        }

        if exit_code == Some(0) || self.stop_requested {
            self.stop_requested = false;
            self.set_status(ServerStatus::Offline);
            self.manager_message(&format!("Server {} shut down.", self.name));
            return;
        }

        self.set_status(ServerStatus::Crashed);
        self.manager_message(&format!("Server {} has crashed.", self.name));

        let now_ms = Utc::now().timestamp_millis();
        match self.crashes.record_crash(now_ms, &self.definition.restart) {
            RestartDecision::Restart { attempt } => {
                self.manager_message(&format!("Attempting restart {attempt}."));
                self.try_restart();
            }
            RestartDecision::Exhausted { attempt } => {
                warn!(server = %self.name, attempt, "restart budget exhausted");
                self.manager_message(
                    "The server crashed too many times. Automatic restarts will no longer be attempted.",
                );
            }
            RestartDecision::Disabled => {
                debug!(server = %self.name, "automatic restarts disabled");
            }
        }
    }

    /// Spawn a replacement; on failure stay crashed with no further attempt.
    fn try_restart(&mut self) {
        self.set_status(ServerStatus::Restarting);
        if let Err(e) = self.spawn_process() {
            error!(server = %self.name, error = %e, "restart failed");
            self.manager_message("The server could not be restarted.");
            self.set_status(ServerStatus::Crashed);
        }
    }
}

/// Wait for the child to exit and report it to the supervisor.
async fn wait_for_exit(
    server: String,
    mut child: Child,
    generation: u64,
    events: Option<mpsc::UnboundedSender<SupervisorMessage>>,
) {
    let exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            error!(server = %server, error = %e, "failed to wait for process");
            None
        }
    };

    let Some(events) = events else {
        debug!(server = %server, "supervisor gone, exit not reported");
        return;
    };
    if events
        .send(SupervisorMessage::Exited {
            generation,
            exit_code,
        })
        .is_err()
    {
        debug!(server = %server, "supervisor gone, exit not reported");
    }
}
