//! Connection state and reconnect statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Lifecycle state of a resilient connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The active connection is believed healthy.
    Connected,

    /// A replacement connection is being dialed.
    Reconnecting,

    /// The last reconnect attempt failed; the active connection is broken.
    Disconnected,

    /// The connection was closed by the caller.
    Closed,
}

impl ConnectionState {
    fn encode(self) -> u8 {
        match self {
            ConnectionState::Connected => 0,
            ConnectionState::Reconnecting => 1,
            ConnectionState::Disconnected => 2,
            ConnectionState::Closed => 3,
        }
    }

    fn decode(encoded: u8) -> Self {
        match encoded {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Reconnecting,
            2 => ConnectionState::Disconnected,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared, lock-free view of a connection's state and counters.
///
/// Cloning is cheap and every clone observes the same connection, so a
/// monitoring task can hold one without touching the connection itself.
#[derive(Clone)]
pub struct ConnectionStats {
    inner: Arc<Counters>,
}

struct Counters {
    state: AtomicU8,
    reconnects: AtomicU64,
    failed_reconnects: AtomicU64,
    exhausted_calls: AtomicU64,
    fatal_errors: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Counters {
                state: AtomicU8::new(ConnectionState::Connected.encode()),
                reconnects: AtomicU64::new(0),
                failed_reconnects: AtomicU64::new(0),
                exhausted_calls: AtomicU64::new(0),
                fatal_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::decode(self.inner.state.load(Ordering::Acquire))
    }

    /// Number of times the active connection was replaced.
    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    /// Number of reconnect dials that failed.
    pub fn failed_reconnects(&self) -> u64 {
        self.inner.failed_reconnects.load(Ordering::Relaxed)
    }

    /// Number of read/write calls that gave up after exhausting their retries.
    pub fn exhausted_calls(&self) -> u64 {
        self.inner.exhausted_calls.load(Ordering::Relaxed)
    }

    /// Number of read/write calls that failed with a non-retryable error.
    pub fn fatal_errors(&self) -> u64 {
        self.inner.fatal_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        // Closed is terminal.
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (ConnectionState::decode(current) != ConnectionState::Closed)
                    .then_some(state.encode())
            });
    }

    pub(crate) fn record_reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
    }

    pub(crate) fn record_failed_reconnect(&self) {
        self.inner.failed_reconnects.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Disconnected);
    }

    /// A dial that was cut short leaves the connection disconnected, unless
    /// another caller finished a reconnect in the meantime.
    pub(crate) fn record_abandoned_reconnect(&self) {
        let _ = self.inner.state.compare_exchange(
            ConnectionState::Reconnecting.encode(),
            ConnectionState::Disconnected.encode(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn record_exhausted(&self) {
        self.inner.exhausted_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fatal(&self) {
        self.inner.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ConnectionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStats")
            .field("state", &self.state())
            .field("reconnects", &self.reconnects())
            .field("failed_reconnects", &self.failed_reconnects())
            .field("exhausted_calls", &self.exhausted_calls())
            .field("fatal_errors", &self.fatal_errors())
            .finish()
    }
}
