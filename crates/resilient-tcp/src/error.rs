//! Error taxonomy for resilient connections.
//!
//! Transient failures (end of stream, broken pipe, connection reset) are
//! absorbed by the retry loop and never reach the caller directly. What does
//! reach the caller is one of:
//!
//! - [`Error::RetriesExhausted`]: the peer stayed unreachable for the whole retry
//!   budget. The connection stays usable; the next call starts a fresh budget.
//! - [`Error::Io`]: a fatal I/O error, passed through unchanged. Retrying it is
//!   pointless.
//! - [`Error::Closed`], [`Error::DeadlineExceeded`]: lifecycle and deadline errors.
//! - [`Error::UnknownNetwork`], [`Error::AddressResolution`], [`Error::Connect`]:
//!   failures of the initial dial.
//!
//! # Pattern Matching
//!
//! ```rust
//! use resilient_tcp::Error;
//!
//! fn should_stop(error: &Error) -> bool {
//!     match error {
//!         Error::RetriesExhausted { attempts } => {
//!             eprintln!("peer gone after {} attempts", attempts);
//!             true
//!         }
//!         Error::Closed => true,
//!         other => {
//!             eprintln!("fatal: {}", other);
//!             true
//!         }
//!     }
//! }
//! # let _ = should_stop(&Error::Closed);
//! ```

use resilient_tcp_core::{FailureKind, UnknownNetwork};
use std::io;
use std::net::SocketAddr;

/// Errors returned by [`ResilientConnection`](crate::ResilientConnection) and the dial helpers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The network name was not `tcp`, `tcp4` or `tcp6`.
    #[error(transparent)]
    UnknownNetwork(#[from] UnknownNetwork),

    /// The address could not be resolved to a usable socket address.
    #[error("failed to resolve address {address}: {source}")]
    AddressResolution {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The transport handshake with the peer failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A non-retryable I/O error, exactly as the transport reported it.
    #[error(transparent)]
    Io(io::Error),

    /// Every attempt of the call hit a transient failure.
    #[error("peer unreachable after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The connection was closed.
    #[error("connection already closed")]
    Closed,

    /// The call deadline passed before the call could complete.
    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Returns true if the call gave up after exhausting its retry budget.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }

    /// Returns true if the connection was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Returns true if the call deadline passed.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Error::DeadlineExceeded)
    }

    /// Classifies the error as seen by a caller.
    ///
    /// Only [`FailureKind::RetryBudgetExhausted`] and [`FailureKind::Fatal`] can
    /// occur; transient failures never escape a call.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::RetriesExhausted { .. } => FailureKind::RetryBudgetExhausted,
            _ => FailureKind::Fatal,
        }
    }

    /// Finds an [`Error`] wrapped inside an `io::Error`.
    ///
    /// Errors from the [`Connection`](resilient_tcp_core::Connection)
    /// implementation of a resilient connection are `io::Error`s; this recovers
    /// the original value.
    pub fn find_in(error: &io::Error) -> Option<&Error> {
        error.get_ref().and_then(|inner| inner.downcast_ref::<Error>())
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Error::Io(source) => source.kind(),
            Error::UnknownNetwork(_) => io::ErrorKind::InvalidInput,
            Error::AddressResolution { source, .. } | Error::Connect { source, .. } => {
                source.kind()
            }
            Error::RetriesExhausted { .. } => io::ErrorKind::Other,
            Error::Closed => io::ErrorKind::NotConnected,
            Error::DeadlineExceeded => io::ErrorKind::TimedOut,
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(source) => source,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
