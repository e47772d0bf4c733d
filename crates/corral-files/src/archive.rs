//! Zip compression and extraction inside a server's directories.
//!
//! Directories are stored as explicit `name/` entries ahead of their
//! children; symbolic links inside a directory are not followed. File contents are streamed through a fixed buffer so archive size
//! never dictates memory use. Extraction checks every entry name against the
//! same rules as client paths before anything is written.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use corral_types::{CorralError, Result};

use crate::path::{normalize, parse_path};

const COPY_BUFFER_SIZE: usize = 8 * 1024;

fn zip_error(archive: &Path, e: ZipError) -> CorralError {
    match e {
        ZipError::Io(source) => CorralError::io_at("access archive", archive, source),
        other => CorralError::Archive(format!("{}: {other}", archive.display())),
    }
}

fn copy_stream(input: &mut impl Read, output: &mut impl Write, buffer: &mut [u8]) -> std::io::Result<u64> {
    let mut total = 0u64;
    loop {
        let read = match input.read(buffer) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        output.write_all(&buffer[..read])?;
        total += read as u64;
    }
}

/// Write a new zip at `archive` holding each of `sources` under its own name.
///
/// Fails with `Conflict` if `archive` already exists. A partially written
/// archive is removed on failure.
pub fn compress(archive: &Path, sources: &[PathBuf]) -> Result<()> {
    let file = match OpenOptions::new().write(true).create_new(true).open(archive) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(CorralError::Conflict(format!(
                "{} already exists",
                archive.display()
            )));
        }
        Err(e) => return Err(CorralError::io_at("create", archive, e)),
    };

    let result = write_entries(file, archive, sources);
    if result.is_err() {
        if let Err(e) = fs::remove_file(archive) {
            warn!(archive = %archive.display(), error = %e, "failed to remove partial archive");
        }
    }
    result
}

fn write_entries(file: File, archive: &Path, sources: &[PathBuf]) -> Result<()> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    for source in sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let name = name.to_string_lossy().into_owned();
        add_entry(&mut zip, archive, source, name, options, &mut buffer)?;
    }

    zip.finish().map_err(|e| zip_error(archive, e))?;
    Ok(())
}

fn add_entry(
    zip: &mut ZipWriter<File>,
    archive: &Path,
    source: &Path,
    name: String,
    options: SimpleFileOptions,
    buffer: &mut [u8],
) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            CorralError::io_at("read", &path, e.into())
        })?;
        let path = entry.path();
        // the archive may be created inside a directory being compressed
        if path == archive {
            continue;
        }

        let mut entry_name = name.clone();
        for component in path.strip_prefix(source).unwrap_or(Path::new("")).components() {
            entry_name.push('/');
            entry_name.push_str(&component.as_os_str().to_string_lossy());
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            zip.add_directory(format!("{entry_name}/"), options)
                .map_err(|e| zip_error(archive, e))?;
        } else if file_type.is_file() {
            let mut input = File::open(path).map_err(|e| CorralError::io_at("read", path, e))?;
            zip.start_file(entry_name.clone(), options)
                .map_err(|e| zip_error(archive, e))?;
            copy_stream(&mut input, zip, buffer)
                .map_err(|e| CorralError::io_at("compress", path, e))?;
            debug!(entry = %entry_name, "added archive entry");
        } else {
            debug!(path = %path.display(), "skipping link or special file");
        }
    }
    Ok(())
}

/// Map an entry name onto a path strictly inside `destination`.
fn entry_target(destination: &Path, name: &str) -> Result<PathBuf> {
    let trimmed = name.trim_end_matches('/');
    let relative = parse_path(trimmed)?;
    if relative.has_root() {
        return Err(CorralError::InvalidPath(format!(
            "archive entry {name:?} is absolute"
        )));
    }

    let target = normalize(&destination.join(relative));
    if target == destination || !target.starts_with(destination) {
        return Err(CorralError::InvalidPath(format!(
            "archive entry {name:?} escapes the destination"
        )));
    }
    Ok(target)
}

/// Extract `archive` into `destination`, returning the number of entries written.
///
/// Directory entries are created before any file. Existing files are
/// overwritten; an entry whose type clashes with what is on disk is a
/// `Conflict`.
pub fn extract(archive: &Path, destination: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| CorralError::io_at("open", archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;

    let mut directories = Vec::new();
    let mut files = Vec::new();
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| zip_error(archive, e))?;
        let target = entry_target(destination, entry.name())?;
        if entry.is_dir() {
            directories.push(target);
        } else {
            files.push((index, target));
        }
    }

    for dir in &directories {
        if dir.exists() && !dir.is_dir() {
            return Err(CorralError::Conflict(format!(
                "{} exists and is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(dir).map_err(|e| CorralError::io_at("create", dir, e))?;
    }

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    for (index, target) in &files {
        if target.is_dir() {
            return Err(CorralError::Conflict(format!(
                "{} exists and is a directory",
                target.display()
            )));
        }
        if let Some(parent) = target.parent() {
            if parent.exists() && !parent.is_dir() {
                return Err(CorralError::Conflict(format!(
                    "{} exists and is not a directory",
                    parent.display()
                )));
            }
            fs::create_dir_all(parent).map_err(|e| CorralError::io_at("create", parent, e))?;
        }

        let mut entry = zip.by_index(*index).map_err(|e| zip_error(archive, e))?;
        let mut output =
            File::create(target).map_err(|e| CorralError::io_at("create", target, e))?;
        copy_stream(&mut entry, &mut output, &mut buffer)
            .map_err(|e| CorralError::io_at("extract", target, e))?;
    }

    Ok(directories.len() + files.len())
}
