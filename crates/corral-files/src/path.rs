//! Path parsing, normalization and root confinement.
//!
//! Client paths are always relative and start with the *selector* of one of
//! the server's roots: the final name component of that root directory. The
//! selector picks the root, the rest of the path is resolved inside it, and
//! the result is checked twice:
//!
//! 1. before normalization, any `..` segment rejects the path outright;
//! 2. after normalization, the absolute result must still lie under the
//!    chosen root.

use std::path::{Component, Path, PathBuf};

use corral_types::{CorralError, Result};

/// A client path resolved against one of a server's roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolution {
    /// Absolute path of the chosen root directory.
    pub root: PathBuf,
    /// The client path with its selector stripped.
    pub relative: PathBuf,
    /// Normalized absolute result, always `root` or a descendant of it.
    pub absolute: PathBuf,
}

impl PathResolution {
    /// Whether the path designates the root directory itself.
    pub fn is_root(&self) -> bool {
        self.absolute == self.root
    }
}

/// Validate a raw path string without touching the filesystem.
///
/// Rejects blank strings, NUL bytes, and any `..` segment regardless of
/// where it appears or whether it would normalize away.
pub fn parse_path(text: &str) -> Result<PathBuf> {
    if text.trim().is_empty() {
        return Err(CorralError::EmptyPath);
    }

    // NUL bytes truncate paths at the syscall boundary
    if text.contains('\0') {
        return Err(CorralError::InvalidPath(format!(
            "{text:?} contains a null byte"
        )));
    }

    if text.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(CorralError::InvalidPath(format!(
            "{text:?} cannot contain parent references (..)"
        )));
    }

    Ok(PathBuf::from(text))
}

/// Lexically normalize a path: drop `.` components and fold `..` into
/// their parent. Never touches the filesystem, so it also works for paths
/// that do not exist yet.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => result.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal =
                    matches!(result.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    result.pop();
                } else if !result.has_root() {
                    result.push("..");
                }
                // `..` at the filesystem root stays at the root
            }
            Component::Normal(name) => result.push(name),
        }
    }
    result
}

/// Make `path` absolute against the current directory, then normalize it.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    let cwd = std::env::current_dir()
        .map_err(|e| CorralError::io("could not read the current directory", e))?;
    Ok(normalize(&cwd.join(path)))
}

/// The final name component of a root directory, used to address it.
pub fn selector(root: &Path) -> Option<&std::ffi::OsStr> {
    root.file_name()
}

/// Pick the first root whose selector equals the first component of `path`.
fn select_root<'a>(roots: &'a [PathBuf], path: &Path) -> Option<&'a PathBuf> {
    let Some(Component::Normal(first)) = path.components().next() else {
        return None;
    };
    roots.iter().find(|root| selector(root) == Some(first))
}

/// Resolve `text` against the roots of `server`.
pub fn resolve(server: &str, roots: &[PathBuf], text: &str) -> Result<PathResolution> {
    let outside = || CorralError::PathOutsideServer {
        server: server.to_string(),
        path: text.to_string(),
    };

    let path = normalize(&parse_path(text)?);
    let root = select_root(roots, &path).ok_or_else(outside)?;

    let relative: PathBuf = path.components().skip(1).collect();
    let absolute = normalize(&root.join(&relative));
    if !absolute.starts_with(root) {
        return Err(outside());
    }

    Ok(PathResolution {
        root: root.clone(),
        relative,
        absolute,
    })
}

/// Join a single user-supplied `name` onto `parent`.
///
/// The normalized result must be a direct child of `parent`, which rejects
/// names that smuggle extra segments, absolute paths, or `.`.
pub fn append_name(parent: &Path, name: &str) -> Result<PathBuf> {
    let name_path = parse_path(name)?;
    let result = normalize(&parent.join(name_path));
    if result.parent() != Some(parent) {
        return Err(CorralError::InvalidPath(format!(
            "{name:?} is not a valid name"
        )));
    }
    Ok(result)
}
