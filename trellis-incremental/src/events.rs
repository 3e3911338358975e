//! Diagnostic events and progress reporting
//!
//! Node functions report [`Event`]s through their environment. The evaluator
//! buffers them per node and hands them to the [`EventSink`] only when the
//! node commits, so a node that restarts reports each event once.
//!
//! A [`ProgressReceiver`] observes the evaluator itself: invalidations,
//! scheduling and node completion.

use crate::node::DirtyKind;
use crate::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use trellis_types::Key;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Informational
    Info,
    /// Something looks wrong but the node succeeded
    Warning,
    /// A failure reported by the node
    Error,
    /// Progress of long-running work
    Progress,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Info => "INFO",
            EventKind::Warning => "WARNING",
            EventKind::Error => "ERROR",
            EventKind::Progress => "PROGRESS",
        };
        f.write_str(name)
    }
}

/// A diagnostic message, optionally attributed to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Severity
    pub kind: EventKind,
    /// Node that reported the event, filled in on delivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    /// Human-readable text
    pub message: String,
}

impl Event {
    /// Create an event without a key
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Event {
            kind,
            key: None,
            message: message.into(),
        }
    }

    /// Informational event
    pub fn info(message: impl Into<String>) -> Self {
        Event::new(EventKind::Info, message)
    }

    /// Warning event
    pub fn warn(message: impl Into<String>) -> Self {
        Event::new(EventKind::Warning, message)
    }

    /// Error event
    pub fn error(message: impl Into<String>) -> Self {
        Event::new(EventKind::Error, message)
    }

    /// Progress event
    pub fn progress(message: impl Into<String>) -> Self {
        Event::new(EventKind::Progress, message)
    }

    /// Attach the reporting node
    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}: {}: {}", self.kind, key, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Receives events of committed nodes
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Deliver one event
    fn handle(&self, event: &Event);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn handle(&self, event: &Event) {
        let key = event.key.as_ref().map(ToString::to_string);
        match event.kind {
            EventKind::Info => tracing::info!(key = ?key, "{}", event.message),
            EventKind::Warning => tracing::warn!(key = ?key, "{}", event.message),
            EventKind::Error => tracing::error!(key = ?key, "{}", event.message),
            EventKind::Progress => tracing::debug!(key = ?key, "{}", event.message),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Drain the events received so far
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of events collected
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True if nothing was collected
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for CollectingEventSink {
    fn handle(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Step of a single node evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Re-checking the dependencies of a dirty node
    CheckDirty,
    /// Running the node function
    Compute,
    /// Recording the result and signaling parents
    Commit,
}

/// How a node reached done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationState {
    /// Its function ran
    Built,
    /// It was verified clean and kept its previous value
    Clean,
}

/// Observer of evaluator progress. Every method defaults to a no-op.
///
/// Methods are called from worker threads and must not block for long.
pub trait ProgressReceiver: Send + Sync + fmt::Debug {
    /// A node was dirtied by `invalidate`, `inject` or propagation
    fn invalidated(&self, _key: &Key, _kind: DirtyKind) {}

    /// A node is about to be added to the work queue
    fn enqueueing(&self, _key: &Key) {}

    /// A node entered `state`
    fn state_starting(&self, _key: &Key, _state: NodeState) {}

    /// A node left `state`
    fn state_ending(&self, _key: &Key, _state: NodeState) {}

    /// A node is done. `value` is `None` when it committed an error.
    fn evaluated(&self, _key: &Key, _value: Option<&Value>, _state: EvaluationState) {}
}

/// Ignores all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressReceiver;

impl ProgressReceiver for NullProgressReceiver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = Event::warn("deprecated syntax").with_key(Key::new("parse", "a.md"));
        assert_eq!(event.to_string(), "WARNING: parse:a.md: deprecated syntax");
        assert_eq!(Event::info("done").to_string(), "INFO: done");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::error("boom").with_key(Key::new("build", "x"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["kind"], "error");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["key"]["argument"], "x");
        assert!(serde_json::to_value(Event::info("hi")).unwrap().get("key").is_none());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        sink.handle(&Event::info("one"));
        sink.handle(&Event::progress("two"));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take()[1].kind, EventKind::Progress);
        assert!(sink.is_empty());
    }
}
