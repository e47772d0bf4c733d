//! File metadata and readable content returned by the store.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;

/// Metadata for one entry of a server directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub directory: bool,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Milliseconds since the Unix epoch, zero when unknown.
    pub last_modified_ms: u64,
}

impl FileInfo {
    /// Read metadata for `path`, following symlinks.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            directory: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            last_modified_ms,
        })
    }
}

/// An opened regular file, ready to be streamed to a client.
#[derive(Debug)]
pub struct FileContent {
    pub path: PathBuf,
    pub file: File,
    pub len: u64,
}

impl FileContent {
    /// File name used when offering the content as a download.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
