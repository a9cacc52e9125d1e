//! Structured log events for jobs and rollback executions.
//!
//! Logging is an append-only event stream, not array mutation on a shared
//! object: producers push [`LogEvent`]s into an [`EventSink`], and consumers
//! (console, metrics, alerting) subscribe without coupling to the job's
//! internal representation. The job still carries its own ordered copy so a
//! terminal state always ships with a full log trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Informational progress.
    Info,
    /// Something unexpected but non-fatal.
    Warn,
    /// A failure.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One structured log entry in a job or execution stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// The step or phase that produced the event.
    pub step: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogEvent {
    /// Creates an event recorded now.
    #[must_use]
    pub fn new(level: LogLevel, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            step: step.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Creates an info event.
    #[must_use]
    pub fn info(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, step, message)
    }

    /// Creates a warning event.
    #[must_use]
    pub fn warn(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, step, message)
    }

    /// Creates an error event.
    #[must_use]
    pub fn error(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, step, message)
    }

    /// Attaches a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A sink for log events emitted by orchestration operations.
///
/// Intentionally synchronous: the executor stays deterministic while callers
/// decide when and how to fan events out.
pub trait EventSink: Send {
    /// Records an event.
    fn push(&mut self, event: LogEvent);
}

/// In-memory sink that collects events in order.
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    events: Vec<LogEvent>,
}

impl InMemoryOutbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Drains the outbox, returning all events in insertion order.
    pub fn drain(&mut self) -> Vec<LogEvent> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for InMemoryOutbox {
    fn push(&mut self, event: LogEvent) {
        self.events.push(event);
    }
}

/// Sink that fans events out to any number of subscribers.
///
/// Backed by a `tokio::sync::broadcast` channel; slow subscribers lag rather
/// than block the producer.
#[derive(Debug)]
pub struct BroadcastSink {
    tx: tokio::sync::broadcast::Sender<LogEvent>,
}

impl BroadcastSink {
    /// Creates a sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes a new consumer.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn push(&mut self, event: LogEvent) {
        // Send fails only when there are no subscribers; events are still
        // retained on the job itself.
        let _ = self.tx.send(event);
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn push(&mut self, _event: LogEvent) {}
}
