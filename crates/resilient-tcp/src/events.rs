//! Events emitted by a resilient connection.
//!
//! Listeners observe reconnects, failed reconnect attempts, exhausted retry
//! budgets, fatal errors and close. They run inline on the task that triggered
//! the event, so they should be quick.

use resilient_tcp_core::Direction;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something that happened to a resilient connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The active connection was replaced by a freshly dialed one.
    Reconnected {
        name: String,
        timestamp: Instant,
        /// Attempt number within the call that triggered it; `0` for an explicit reconnect.
        attempt: u32,
        peer: SocketAddr,
    },
    /// Dialing a replacement failed; the call waits `delay` before trying again.
    ReconnectFailed {
        name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
    },
    /// A call gave up after its last attempt.
    RetriesExhausted {
        name: String,
        timestamp: Instant,
        direction: Direction,
        attempts: u32,
    },
    /// A call failed with an error that is not worth a reconnect.
    FatalError {
        name: String,
        timestamp: Instant,
        direction: Direction,
        kind: io::ErrorKind,
    },
    /// The connection was closed.
    Closed { name: String, timestamp: Instant },
}

impl ConnectionEvent {
    /// Returns a stable name for the kind of event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ConnectionEvent::Reconnected { .. } => "Reconnected",
            ConnectionEvent::ReconnectFailed { .. } => "ReconnectFailed",
            ConnectionEvent::RetriesExhausted { .. } => "RetriesExhausted",
            ConnectionEvent::FatalError { .. } => "FatalError",
            ConnectionEvent::Closed { .. } => "Closed",
        }
    }

    /// Returns when the event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            ConnectionEvent::Reconnected { timestamp, .. }
            | ConnectionEvent::ReconnectFailed { timestamp, .. }
            | ConnectionEvent::RetriesExhausted { timestamp, .. }
            | ConnectionEvent::FatalError { timestamp, .. }
            | ConnectionEvent::Closed { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the name of the connection that emitted the event.
    pub fn name(&self) -> &str {
        match self {
            ConnectionEvent::Reconnected { name, .. }
            | ConnectionEvent::ReconnectFailed { name, .. }
            | ConnectionEvent::RetriesExhausted { name, .. }
            | ConnectionEvent::FatalError { name, .. }
            | ConnectionEvent::Closed { name, .. } => name,
        }
    }
}

/// Receives [`ConnectionEvent`]s.
///
/// Implemented for every `Fn(&ConnectionEvent)` closure.
pub trait EventListener: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ConnectionEvent);
}

impl<F> EventListener for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ConnectionEvent) {
        self(event)
    }
}

/// A collection of event listeners.
#[derive(Clone, Default)]
pub struct EventListeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl EventListeners {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Delivers `event` to every listener.
    ///
    /// A panicking listener is isolated; the remaining listeners still run.
    pub fn emit(&self, event: &ConnectionEvent) {
        for listener in &self.listeners {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
        }
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}
