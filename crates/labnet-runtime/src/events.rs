//! Operator-facing event feed.
//!
//! The core reports what it did through an [`EventSink`]. [`EventLog`]
//! keeps the most recent events in memory for display and mirrors each
//! one to `tracing`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Category of a [`LabEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Routine progress.
    Info,
    /// Something degraded but the operation went on.
    Warning,
    /// An operation failed.
    Error,
    /// A container was deployed or removed.
    Deployment,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Deployment => write!(f, "deployment"),
        }
    }
}

/// One entry of the event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabEvent {
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Event category.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Human-readable description.
    pub message: String,
}

/// Append-only consumer of control-plane events.
pub trait EventSink: Send + Sync {
    /// Records an event.
    fn emit(&self, event: LabEvent);
}

/// Bounded in-memory event feed. The oldest event is dropped once
/// `capacity` is reached.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<LabEvent>>,
}

impl EventLog {
    /// Creates a feed retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<LabEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: LabEvent) {
        match event.kind {
            EventKind::Error => tracing::error!(kind = %event.kind, "{}", event.message),
            EventKind::Warning => tracing::warn!(kind = %event.kind, "{}", event.message),
            EventKind::Info | EventKind::Deployment => {
                tracing::info!(kind = %event.kind, "{}", event.message);
            }
        }
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.capacity {
            let _ = events.pop_front();
        }
        events.push_back(event);
    }
}

/// Stamps events with the clock and forwards them to a sink.
#[derive(Clone)]
pub struct EventReporter {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl EventReporter {
    /// Creates a reporter writing to `sink`.
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Emits an event of the given kind.
    pub fn report(&self, kind: EventKind, message: impl Into<String>) {
        self.sink.emit(LabEvent {
            timestamp: self.clock.now(),
            kind,
            message: message.into(),
        });
    }

    /// Emits an [`EventKind::Info`] event.
    pub fn info(&self, message: impl Into<String>) {
        self.report(EventKind::Info, message);
    }

    /// Emits an [`EventKind::Warning`] event.
    pub fn warning(&self, message: impl Into<String>) {
        self.report(EventKind::Warning, message);
    }

    /// Emits an [`EventKind::Error`] event.
    pub fn error(&self, message: impl Into<String>) {
        self.report(EventKind::Error, message);
    }

    /// Emits an [`EventKind::Deployment`] event.
    pub fn deployment(&self, message: impl Into<String>) {
        self.report(EventKind::Deployment, message);
    }

    /// Current time on the reporter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl fmt::Debug for EventReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReporter").finish_non_exhaustive()
    }
}
