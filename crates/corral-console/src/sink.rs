//! Fan-out of status and console events to external observers.
//!
//! The core publishes `(topic, payload)` pairs and never waits for anyone to
//! read them. Topics are `status/<server>` and `console/<server>`.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::trace;

/// One published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub topic: String,
    pub payload: String,
}

/// Destination for status and console events.
pub trait BroadcastSink: Send + Sync {
    /// Publish `payload` on `topic`. Must not block.
    fn publish(&self, topic: &str, payload: &str);
}

/// Topic carrying the status name of `server` on every transition.
pub fn status_topic(server: &str) -> String {
    format!("status/{server}")
}

/// Topic carrying every console line of `server`.
pub fn console_topic(server: &str) -> String {
    format!("console/{server}")
}

/// Sink backed by a `tokio::sync::broadcast` channel.
///
/// Slow subscribers lag and lose events; publishing never fails.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<Broadcast>,
}

impl ChannelSink {
    /// Create a sink whose channel buffers up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attach a new observer. It only sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.tx.subscribe()
    }
}

impl BroadcastSink for ChannelSink {
    fn publish(&self, topic: &str, payload: &str) {
        let event = Broadcast {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        if self.tx.send(event).is_err() {
            trace!(topic, "no subscribers for broadcast");
        }
    }
}

/// Sink that keeps every event in memory, in publish order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Broadcast>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<Broadcast> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Payloads published on `topic`, in order.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.topic == topic)
            .map(|e| e.payload)
            .collect()
    }
}

impl BroadcastSink for MemorySink {
    fn publish(&self, topic: &str, payload: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Broadcast {
                topic: topic.to_string(),
                payload: payload.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics() {
        assert_eq!(status_topic("alpha"), "status/alpha");
        assert_eq!(console_topic("alpha"), "console/alpha");
    }

    #[test]
    fn channel_sink_delivers_to_subscribers() {
        let sink = ChannelSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish("status/alpha", "ONLINE");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.topic, "status/alpha");
        assert_eq!(event.payload, "ONLINE");
    }

    #[test]
    fn channel_sink_without_subscribers_is_silent() {
        let sink = ChannelSink::new(8);
        sink.publish("console/alpha", "nobody listening");
    }

    #[test]
    fn memory_sink_filters_by_topic() {
        let sink = MemorySink::new();
        sink.publish("console/a", "1");
        sink.publish("status/a", "ONLINE");
        sink.publish("console/a", "2");
        assert_eq!(sink.payloads("console/a"), vec!["1", "2"]);
        assert_eq!(sink.events().len(), 3);
    }
}
