//! Durable storage of the fleet's definition set.

use std::path::Path;

use tracing::{debug, info};

use corral_types::{CorralError, DefinitionSet, Result};

/// Load the definition set at `path`. A missing file is an empty fleet.
pub fn load_definitions(path: &Path) -> Result<DefinitionSet> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let set = DefinitionSet::from_toml(&content)?;
            info!(path = %path.display(), servers = set.servers.len(), "loaded server definitions");
            Ok(set)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no definitions file, starting with an empty fleet");
            Ok(DefinitionSet::default())
        }
        Err(e) => Err(CorralError::io_at("read", path, e)),
    }
}

/// Rewrite the definition set atomically (write tmp, then rename).
pub fn save_definitions(path: &Path, set: &DefinitionSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| CorralError::io_at("create", parent, e))?;
        }
    }

    let content = set.to_toml()?;
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content).map_err(|e| CorralError::io_at("write", &tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| CorralError::io_at("replace", path, e))?;

    debug!(path = %path.display(), servers = set.servers.len(), "saved server definitions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use corral_types::ServerDefinition;

    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = load_definitions(&dir.path().join("servers.toml")).unwrap();
        assert!(set.servers.is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("servers.toml");

        let mut set = DefinitionSet::default();
        set.servers
            .insert("alpha".into(), ServerDefinition::new("sleep 30", "/srv/alpha"));
        save_definitions(&path, &set).unwrap();

        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(load_definitions(&path).unwrap(), set);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.toml");
        std::fs::write(&path, "[servers.alpha]\ncommand = 3\n").unwrap();
        assert!(matches!(load_definitions(&path), Err(CorralError::Config(_))));
    }
}
