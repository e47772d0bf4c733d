//! Sandboxed file operations over the directories of each managed server.
//!
//! Every operation takes a server name and one or more client paths, resolves
//! them through [`crate::path::resolve`], and only then touches the disk.
//! User-supplied leaf names go through [`append_name`] so they can never add
//! path segments of their own.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use corral_types::{CorralError, Result, ServerDefinition};

use crate::archive;
use crate::info::{FileContent, FileInfo};
use crate::path::{absolute, append_name, parse_path, resolve, PathResolution};

/// Log a failed filesystem call and wrap it.
fn io_failure(server: &str, action: &str, path: &Path, e: std::io::Error) -> CorralError {
    error!(server, path = %path.display(), error = %e, "could not {action}");
    CorralError::io_at(action, path, e)
}

fn not_found(path: &Path) -> CorralError {
    CorralError::NotFound(format!("{} does not exist", path.display()))
}

fn already_exists(path: &Path) -> CorralError {
    CorralError::Conflict(format!("{} already exists", path.display()))
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CorralError::InvalidPath(format!("{} has no name", path.display())))
}

/// Check a working directory string and make it absolute.
pub fn working_directory(text: &str) -> Result<PathBuf> {
    let path = absolute(&parse_path(text)?)?;
    if !path.exists() {
        return Err(CorralError::InvalidPath(format!(
            "working directory {} does not exist",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(CorralError::InvalidPath(format!(
            "working directory {} is not a directory",
            path.display()
        )));
    }
    Ok(path)
}

/// Per-server root directories plus every operation confined to them.
#[derive(Default)]
pub struct SandboxedFileStore {
    roots: RwLock<HashMap<String, Vec<PathBuf>>>,
}

impl SandboxedFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Root registration
    // -----------------------------------------------------------------------

    /// Register the roots of `server` from its definition.
    ///
    /// The working directory must be an existing directory. Extra directories
    /// that fail the same checks are skipped with a warning.
    pub fn add_server_directories(&self, server: &str, definition: &ServerDefinition) -> Result<()> {
        let mut roots = vec![working_directory(&definition.working_directory)?];

        for extra in &definition.extra_directories {
            match working_directory(extra) {
                Ok(path) => roots.push(path),
                Err(e) => warn!(server, directory = %extra, error = %e, "skipping extra directory"),
            }
        }

        debug!(server, roots = roots.len(), "registered server directories");
        self.roots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server.to_string(), roots);
        Ok(())
    }

    /// Replace the roots of `server` after its definition changed.
    pub fn update_server_directories(&self, server: &str, definition: &ServerDefinition) -> Result<()> {
        self.add_server_directories(server, definition)
    }

    pub fn remove_server_directories(&self, server: &str) {
        self.roots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server);
    }

    /// Absolute roots of `server`, working directory first.
    pub fn roots(&self, server: &str) -> Result<Vec<PathBuf>> {
        self.roots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(server)
            .cloned()
            .ok_or_else(|| CorralError::ServerNotFound(server.to_string()))
    }

    /// Resolve a client path of `server` to an absolute path inside its roots.
    pub fn resolve(&self, server: &str, path: &str) -> Result<PathResolution> {
        let roots = self.roots(server)?;
        resolve(server, &roots, path)
    }

    fn resolve_existing(&self, server: &str, path: &str) -> Result<PathResolution> {
        let res = self.resolve(server, path)?;
        if !res.absolute.exists() {
            return Err(not_found(&res.absolute));
        }
        Ok(res)
    }

    fn resolve_directory(&self, server: &str, path: &str) -> Result<PathResolution> {
        let res = self.resolve_existing(server, path)?;
        if !res.absolute.is_dir() {
            return Err(CorralError::InvalidPath(format!(
                "{} is not a directory",
                res.absolute.display()
            )));
        }
        Ok(res)
    }

    // -----------------------------------------------------------------------
    // Listing and reading
    // -----------------------------------------------------------------------

    /// Metadata for each root of `server`.
    pub fn list_roots(&self, server: &str) -> Result<Vec<FileInfo>> {
        self.roots(server)?
            .iter()
            .map(|root| FileInfo::from_path(root).map_err(|e| io_failure(server, "read", root, e)))
            .collect()
    }

    /// Direct children of a directory, sorted by name.
    pub fn list(&self, server: &str, path: &str) -> Result<Vec<FileInfo>> {
        let dir = self.resolve_directory(server, path)?.absolute;

        let entries = fs::read_dir(&dir).map_err(|e| io_failure(server, "list", &dir, e))?;
        let mut infos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_failure(server, "list", &dir, e))?;
            match FileInfo::from_path(&entry.path()) {
                Ok(info) => infos.push(info),
                // dangling symlinks and races with deletion
                Err(e) => debug!(server, path = %entry.path().display(), error = %e, "skipping entry"),
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Open a regular file for streaming.
    pub fn open_file(&self, server: &str, path: &str) -> Result<FileContent> {
        let file_path = self.resolve_existing(server, path)?.absolute;
        if file_path.is_dir() {
            return Err(CorralError::MethodNotAllowed(format!(
                "{} is a directory",
                file_path.display()
            )));
        }

        let file = fs::File::open(&file_path).map_err(|e| io_failure(server, "open", &file_path, e))?;
        let len = file
            .metadata()
            .map_err(|e| io_failure(server, "read", &file_path, e))?
            .len();
        Ok(FileContent {
            path: file_path,
            file,
            len,
        })
    }

    // -----------------------------------------------------------------------
    // Creating and editing
    // -----------------------------------------------------------------------

    /// Create an empty file called `name` inside directory `path`.
    pub fn create_file(&self, server: &str, path: &str, name: &str) -> Result<PathBuf> {
        let parent = self.resolve_directory(server, path)?.absolute;
        let target = append_name(&parent, name)?;

        match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(_) => {
                info!(server, path = %target.display(), "created file");
                Ok(target)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(already_exists(&target)),
            Err(e) => Err(io_failure(server, "create", &target, e)),
        }
    }

    /// Create a directory called `name` inside directory `path`.
    pub fn create_directory(&self, server: &str, path: &str, name: &str) -> Result<PathBuf> {
        let parent = self.resolve_directory(server, path)?.absolute;
        let target = append_name(&parent, name)?;

        match fs::create_dir(&target) {
            Ok(()) => {
                info!(server, path = %target.display(), "created directory");
                Ok(target)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(already_exists(&target)),
            Err(e) => Err(io_failure(server, "create", &target, e)),
        }
    }

    /// Store the bytes of `content` as a new file `name` inside directory `path`.
    pub fn upload(
        &self,
        server: &str,
        path: &str,
        name: &str,
        content: &mut impl Read,
    ) -> Result<PathBuf> {
        let parent = self.resolve_directory(server, path)?.absolute;
        let target = append_name(&parent, name)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(already_exists(&target)),
            Err(e) => return Err(io_failure(server, "create", &target, e)),
        };

        if let Err(e) = std::io::copy(content, &mut file) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&target) {
                warn!(server, path = %target.display(), error = %cleanup, "failed to remove partial upload");
            }
            return Err(io_failure(server, "upload", &target, e));
        }

        info!(server, path = %target.display(), "uploaded file");
        Ok(target)
    }

    /// Replace the content of a file, creating it if needed.
    pub fn edit_file(&self, server: &str, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(server, path)?.absolute;
        if target.is_dir() {
            return Err(CorralError::MethodNotAllowed(format!(
                "{} is a directory",
                target.display()
            )));
        }
        fs::write(&target, content).map_err(|e| io_failure(server, "write", &target, e))
    }

    // -----------------------------------------------------------------------
    // Deleting
    // -----------------------------------------------------------------------

    /// Delete a file or directory tree. Deleting something absent succeeds.
    pub fn delete(&self, server: &str, path: &str) -> Result<()> {
        let res = self.resolve(server, path)?;
        if res.is_root() {
            return Err(CorralError::MethodNotAllowed(
                "a server root cannot be deleted".into(),
            ));
        }
        remove_path(server, &res.absolute)
    }

    /// Delete each path in order, stopping at the first failure.
    pub fn delete_many(&self, server: &str, paths: &[String]) -> Result<()> {
        for path in paths {
            self.delete(server, path)?;
        }
        Ok(())
    }

    /// Delete everything inside a directory, keeping the directory itself.
    pub fn clear_directory(&self, server: &str, path: &str) -> Result<()> {
        let dir = self.resolve_directory(server, path)?.absolute;
        let entries = fs::read_dir(&dir).map_err(|e| io_failure(server, "list", &dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_failure(server, "list", &dir, e))?;
            remove_path(server, &entry.path())?;
        }
        info!(server, path = %dir.display(), "cleared directory");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Renaming, moving and copying
    // -----------------------------------------------------------------------

    /// Rename a file or directory in place.
    pub fn rename(&self, server: &str, path: &str, new_name: &str) -> Result<PathBuf> {
        let source = self.resolve_existing(server, path)?;
        if source.is_root() {
            return Err(CorralError::MethodNotAllowed(
                "a server root cannot be renamed".into(),
            ));
        }

        let parent = source.absolute.parent().ok_or_else(|| not_found(&source.absolute))?;
        let target = append_name(parent, new_name)?;
        if target.exists() {
            return Err(already_exists(&target));
        }

        fs::rename(&source.absolute, &target)
            .map_err(|e| io_failure(server, "rename", &source.absolute, e))?;
        info!(server, from = %source.absolute.display(), to = %target.display(), "renamed");
        Ok(target)
    }

    /// Move `path` into the directory `destination`, keeping its name.
    pub fn move_to(&self, server: &str, path: &str, destination: &str) -> Result<PathBuf> {
        let (source, target) = self.transfer_target(server, path, destination)?;
        if source.is_root() {
            return Err(CorralError::MethodNotAllowed(
                "a server root cannot be moved".into(),
            ));
        }

        fs::rename(&source.absolute, &target)
            .map_err(|e| io_failure(server, "move", &source.absolute, e))?;
        info!(server, from = %source.absolute.display(), to = %target.display(), "moved");
        Ok(target)
    }

    /// Copy `path` (recursively) into the directory `destination`.
    pub fn copy_to(&self, server: &str, path: &str, destination: &str) -> Result<PathBuf> {
        let (source, target) = self.transfer_target(server, path, destination)?;
        if target.starts_with(&source.absolute) {
            return Err(CorralError::MethodNotAllowed(format!(
                "{} cannot be copied into itself",
                source.absolute.display()
            )));
        }

        copy_recursively(server, &source.absolute, &target)?;
        info!(server, from = %source.absolute.display(), to = %target.display(), "copied");
        Ok(target)
    }

    /// Move each path, continuing past failures and returning them.
    pub fn move_many(&self, server: &str, paths: &[String], destination: &str) -> Vec<(String, CorralError)> {
        paths
            .iter()
            .filter_map(|path| {
                self.move_to(server, path, destination)
                    .err()
                    .map(|e| (path.clone(), e))
            })
            .collect()
    }

    /// Copy each path, continuing past failures and returning them.
    pub fn copy_many(&self, server: &str, paths: &[String], destination: &str) -> Vec<(String, CorralError)> {
        paths
            .iter()
            .filter_map(|path| {
                self.copy_to(server, path, destination)
                    .err()
                    .map(|e| (path.clone(), e))
            })
            .collect()
    }

    /// Resolve the source and its would-be location inside `destination`.
    fn transfer_target(
        &self,
        server: &str,
        path: &str,
        destination: &str,
    ) -> Result<(PathResolution, PathBuf)> {
        let source = self.resolve_existing(server, path)?;
        let dest_dir = self.resolve_directory(server, destination)?.absolute;
        let target = append_name(&dest_dir, &file_name_of(&source.absolute)?)?;
        if target.exists() {
            return Err(already_exists(&target));
        }
        Ok((source, target))
    }

    /// Names anywhere under `destination` that match one of `names`.
    ///
    /// Used to warn before a bulk transfer that would collide.
    pub fn conflicting_files(&self, server: &str, destination: &str, names: &[String]) -> Result<Vec<String>> {
        let dir = self.resolve_directory(server, destination)?.absolute;
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();

        let mut found = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| walk_failure(server, &dir, e))?;
            let name = entry.file_name().to_string_lossy();
            if wanted.contains(&*name) {
                found.push(name.into_owned());
            }
        }
        found.sort();
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Archives
    // -----------------------------------------------------------------------

    /// Zip `files` into a new archive at `archive_path`.
    pub fn compress(&self, server: &str, archive_path: &str, files: &[String]) -> Result<PathBuf> {
        let target = self.resolve(server, archive_path)?.absolute;
        if target.exists() {
            return Err(already_exists(&target));
        }

        let sources = files
            .iter()
            .map(|file| self.resolve_existing(server, file).map(|res| res.absolute))
            .collect::<Result<Vec<_>>>()?;

        archive::compress(&target, &sources).inspect_err(|e| {
            error!(server, archive = %target.display(), error = %e, "compression failed");
        })?;
        info!(server, archive = %target.display(), files = sources.len(), "created archive");
        Ok(target)
    }

    /// Extract an archive into the directory that contains it.
    pub fn decompress(&self, server: &str, archive_path: &str) -> Result<usize> {
        let source = self.resolve_existing(server, archive_path)?.absolute;
        if source.is_dir() {
            return Err(CorralError::MethodNotAllowed(format!(
                "{} is a directory",
                source.display()
            )));
        }
        let destination = source.parent().ok_or_else(|| not_found(&source))?;

        let entries = archive::extract(&source, destination).inspect_err(|e| {
            error!(server, archive = %source.display(), error = %e, "extraction failed");
        })?;
        info!(server, archive = %source.display(), entries, "extracted archive");
        Ok(entries)
    }
}

fn remove_path(server: &str, path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_failure(server, "delete", path, e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            info!(server, path = %path.display(), "deleted");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_failure(server, "delete", path, e)),
    }
}

fn walk_failure(server: &str, root: &Path, e: walkdir::Error) -> CorralError {
    let path = e.path().unwrap_or(root).to_path_buf();
    io_failure(server, "list", &path, e.into())
}

fn copy_recursively(server: &str, source: &Path, target: &Path) -> Result<()> {
    let walk = WalkDir::new(source)
        .follow_links(false)
        .follow_root_links(false);
    for entry in walk {
        let entry = entry.map_err(|e| walk_failure(server, source, e))?;
        let path = entry.path();
        let destination = match path.strip_prefix(source) {
            Ok(relative) if relative.as_os_str().is_empty() => target.to_path_buf(),
            Ok(relative) => target.join(relative),
            Err(_) => continue,
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir(&destination).map_err(|e| io_failure(server, "create", &destination, e))?;
        } else if file_type.is_file() || path.is_file() {
            fs::copy(path, &destination).map_err(|e| io_failure(server, "copy", path, e))?;
        } else {
            warn!(server, path = %path.display(), "skipping symlink that does not point to a file");
        }
    }
    Ok(())
}
