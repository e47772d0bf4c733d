use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use corral_daemon::DaemonRuntime;
use corral_types::DaemonConfig;

/// How long servers get to exit after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Run the daemon in the foreground until Ctrl-C.
pub fn run(config_path: Option<&Path>, start: &[String]) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config, start))
}

async fn serve(config: DaemonConfig, start: &[String]) -> anyhow::Result<()> {
    let daemon = DaemonRuntime::start(config)?;

    let mut events = daemon.subscribe();
    let observer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(topic = %event.topic, payload = %event.payload, "broadcast"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "broadcast observer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for name in start {
        match daemon.fleet().start_server(name).await {
            Ok(()) => info!(server = %name, "started"),
            Err(e) => error!(server = %name, error = %e, "failed to start server"),
        }
    }

    info!(
        servers = daemon.fleet().len().await,
        "corral is running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    daemon.shutdown(SHUTDOWN_GRACE).await;
    observer.abort();
    Ok(())
}
