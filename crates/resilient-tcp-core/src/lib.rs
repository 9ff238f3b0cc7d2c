//! Transport capability set for resilient-tcp.
//!
//! This crate provides the pieces the reconnecting connection is built on:
//! - [`Connection`]: read/write/close/address contract of a stream connection
//! - [`TcpConnector`]: a `tower` service that opens TCP connections for a [`Target`]
//! - [`Network`] and [`resolve`]: network kind parsing and address resolution
//! - [`classify`]: portable mapping of I/O errors to transient or fatal failures

pub mod classify;
pub mod connection;
pub mod connector;

pub use classify::{Direction, FailureKind, classify, classify_eof};
pub use connection::Connection;
pub use connector::{Network, TcpConnector, Target, UnknownNetwork, resolve};
