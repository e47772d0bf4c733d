pub mod list;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::Context;

use corral_daemon::persistence::load_definitions;
use corral_types::{DaemonConfig, DefinitionSet, CONFIG_FILENAME};

/// Load the daemon config from `path`, or from `./corral.toml` when absent.
///
/// An explicitly named file must exist; the default one may be missing.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
            DaemonConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))
        }
        None => {
            let default = PathBuf::from(CONFIG_FILENAME);
            DaemonConfig::load(&default)
                .with_context(|| format!("failed to load {}", default.display()))
        }
    }
}

/// Load the persisted definitions named by `config`.
pub fn load_fleet_definitions(config: &DaemonConfig) -> anyhow::Result<DefinitionSet> {
    load_definitions(&config.definitions_path).with_context(|| {
        format!(
            "failed to load definitions from {}",
            config.definitions_path.display()
        )
    })
}
