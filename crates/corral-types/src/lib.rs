//! Core types shared across all corral crates.
//!
//! Defines the persisted server definitions, the daemon configuration, the
//! server status enum, the command tokenizer and the error taxonomy used by
//! the console, file store and daemon crates.

pub mod command;
pub mod error;
pub mod fleet;

pub use command::tokenize;
pub use error::{CorralError, Result};
pub use fleet::{
    DaemonConfig, DefinitionSet, RestartPolicy, ServerDefinition, ServerStatus, ServerSummary,
    CONFIG_FILENAME,
};
