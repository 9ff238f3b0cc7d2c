//! TCP connections that reconnect on their own.
//!
//! A [`ResilientConnection`] looks like an ordinary stream connection. When the
//! peer goes away (end of stream on read, broken pipe, connection reset) it
//! dials the same peer again, backing off exponentially while the peer stays
//! unreachable, and retries the interrupted read or write. Callers only see an
//! error once the retry budget of that call is spent, or when the failure is
//! one that no reconnect can fix.
//!
//! ## Features
//! - Transparent reconnect on transient failures, with per-call retry budget
//! - Exponential backoff starting from a configurable interval
//! - Fatal errors passed through unchanged
//! - Retry settings adjustable on a live connection
//! - Optional per-call deadline and interruptible close
//! - Event listeners for reconnects, failures and exhaustion
//! - Metrics support via the `metrics` feature flag
//! - Tracing support via the `tracing` feature flag
//!
//! ## Example
//! ```rust,no_run
//! use resilient_tcp::{ConnectionConfig, Error};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let conn = ConnectionConfig::builder()
//!         .max_retries(10)
//!         .retry_interval(Duration::from_millis(50))
//!         .name("upstream")
//!         .on_reconnect(|attempt| println!("reconnected on attempt {}", attempt))
//!         .build()
//!         .dial("tcp", "localhost:7000")
//!         .await?;
//!
//!     conn.write(b"hello, world!").await?;
//!
//!     let mut buf = [0u8; 1024];
//!     match conn.read(&mut buf).await {
//!         Ok(n) => println!("read {} bytes", n),
//!         Err(e) if e.is_retries_exhausted() => println!("peer is gone"),
//!         Err(e) => return Err(e),
//!     }
//!
//!     conn.close().await
//! }
//! ```
//!
//! ## Feature Flags
//! - `metrics`: enables metrics collection using the `metrics` crate.
//! - `tracing`: enables logging and tracing using the `tracing` crate.

use std::net::SocketAddr;

pub use backoff::ExponentialBackoff;
pub use config::{
    ConnectionConfig, ConnectionConfigBuilder, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL,
};
pub use connection::ResilientConnection;
pub use error::Error;
pub use events::{ConnectionEvent, EventListener, EventListeners};
pub use resilient_tcp_core::{
    Connection, Direction, FailureKind, Network, TcpConnector, Target, UnknownNetwork,
};
pub use state::{ConnectionState, ConnectionStats};

mod backoff;
mod config;
mod connection;
mod error;
mod events;
mod state;

/// Dials `address` on `network` with the default configuration.
///
/// `network` is one of `"tcp"`, `"tcp4"` or `"tcp6"`; `address` is a
/// `host:port` pair. Up to [`DEFAULT_MAX_RETRIES`] attempts are made per call,
/// backing off from [`DEFAULT_RETRY_INTERVAL`].
pub async fn dial(network: &str, address: &str) -> Result<ResilientConnection, Error> {
    ConnectionConfig::default().dial(network, address).await
}

/// Dials `remote` on `network` from `local` with the default configuration.
pub async fn dial_with_local(
    network: &str,
    local: Option<SocketAddr>,
    remote: SocketAddr,
) -> Result<ResilientConnection, Error> {
    ConnectionConfig::default()
        .dial_with_local(network, local, remote)
        .await
}
