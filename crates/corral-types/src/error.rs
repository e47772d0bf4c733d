//! Error types shared across all corral crates.

use std::path::Path;

/// Errors that can occur while supervising servers or touching their files.
///
/// Validation variants (`EmptyPath`, `InvalidPath`, `InvalidInput`) are
/// detected before any I/O. Confinement violations surface as
/// `PathOutsideServer`. Everything classified by [`CorralError::is_internal`]
/// is a failure of the host rather than of the request.
#[derive(Debug, thiserror::Error)]
pub enum CorralError {
    #[error("the path cannot be empty")]
    EmptyPath,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("path {path:?} is outside the directories of server {server}")]
    PathOutsideServer { server: String, path: String },

    #[error("server {0} does not exist")]
    ServerNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("process could not be spawned: {0}")]
    ProcessSpawn(String),

    #[error("process could not be signalled: {0}")]
    ProcessSignal(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CorralError {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O error that happened while operating on `path`.
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("could not {action} {}", path.display()), source)
    }

    /// Whether this error is a host-side failure rather than a bad request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Archive(_)
                | Self::Config(_)
                | Self::ProcessSpawn(_)
                | Self::ProcessSignal(_)
        )
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = CorralError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_classification() {
        let io = CorralError::io("write", std::io::Error::other("disk full"));
        assert!(io.is_internal());
        assert!(CorralError::Archive("bad header".into()).is_internal());
        assert!(!CorralError::EmptyPath.is_internal());
        assert!(!CorralError::Conflict("exists".into()).is_internal());
        assert!(!CorralError::ServerNotFound("alpha".into()).is_internal());
    }

    #[test]
    fn io_at_mentions_path() {
        let err = CorralError::io_at(
            "delete",
            Path::new("/srv/alpha/logs"),
            std::io::Error::other("busy"),
        );
        let msg = err.to_string();
        assert!(msg.contains("could not delete /srv/alpha/logs"), "{msg}");
        assert!(msg.contains("busy"), "{msg}");
    }
}
