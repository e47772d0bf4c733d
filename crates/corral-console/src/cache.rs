//! Rolling replay cache of recent console lines.
//!
//! Keeps a fixed-size ring buffer of the most recent lines of one server's
//! console so that newly attached observers get the backlog instantly. Every
//! appended line is also published on the server's console topic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::sink::{console_topic, BroadcastSink};

/// A ring buffer of recent console lines for one managed server.
///
/// Safe to append from the reader task while API callers take snapshots.
pub struct ConsoleCache {
    /// Retained lines, oldest first.
    lines: Mutex<VecDeque<String>>,
    /// Maximum lines to retain.
    capacity: usize,
    topic: String,
    sink: Arc<dyn BroadcastSink>,
}

impl ConsoleCache {
    /// Create a cache for `server` that retains at most `capacity` lines.
    pub fn new(server: &str, capacity: usize, sink: Arc<dyn BroadcastSink>) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            topic: console_topic(server),
            sink,
        }
    }

    /// Append a line, evicting the oldest one when full, and broadcast it.
    ///
    /// The broadcast happens under the buffer lock so that observers see
    /// lines in the same order as the replay snapshot.
    pub fn add_line(&self, line: impl Into<String>) {
        let line = line.into();
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        self.sink.publish(&self.topic, &line);
        lines.push_back(line);
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn cached_lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Number of lines currently retained.
    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
