use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Corral -- supervise a fleet of long-running server processes.
#[derive(Parser, Debug)]
#[command(name = "corral", version, about)]
struct Cli {
    /// Daemon config file (defaults to ./corral.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the fleet and supervise it until Ctrl-C
    Run {
        /// Start this server once loaded (repeatable)
        #[arg(long = "start", value_name = "NAME")]
        start: Vec<String>,
    },

    /// Check the config and every server definition
    Validate,

    /// Show the defined servers
    List {
        /// Print the definitions as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Filter used when `RUST_LOG` is unset. Matches every `corral_*` target.
const DEFAULT_LOG_FILTER: &str = "corral=info";

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides, e.g. RUST_LOG=corral_daemon=debug
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run { start } => commands::run::run(config, &start),
        Commands::Validate => commands::validate::run(config),
        Commands::List { json } => commands::list::run(config, json),
    }
}
