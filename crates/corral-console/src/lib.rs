//! Console I/O for managed servers.
//!
//! # Architecture
//!
//! - [`sink::BroadcastSink`]: fire-and-forget fan-out of status and console events
//! - [`cache::ConsoleCache`]: bounded replay buffer that broadcasts every line
//! - [`bridge::ConsoleBridge`]: one reader task and one writer task per server
//! - [`registry::ConsoleRegistry`]: server name to bridge lookup

pub mod bridge;
pub mod cache;
pub mod registry;
pub mod sink;

pub use bridge::{ConsoleBridge, ProcessStreams, MANAGER_PREFIX};
pub use cache::ConsoleCache;
pub use registry::ConsoleRegistry;
pub use sink::{console_topic, status_topic, Broadcast, BroadcastSink, ChannelSink, MemorySink};
