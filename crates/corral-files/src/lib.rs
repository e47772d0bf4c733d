//! Sandboxed file access for managed servers.
//!
//! Each server owns an ordered list of root directories: its working
//! directory first, then any extra directories from its definition. Clients
//! address files by paths such as `alpha/logs/latest.log`, where the first
//! segment names a root. Nothing outside those roots is ever reachable.

pub mod archive;
pub mod info;
pub mod path;
pub mod store;

pub use info::{FileContent, FileInfo};
pub use path::{append_name, parse_path, PathResolution};
pub use store::{working_directory, SandboxedFileStore};
