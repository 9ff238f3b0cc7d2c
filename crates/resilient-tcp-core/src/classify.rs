//! Failure classification for stream I/O.
//!
//! Only a handful of error kinds mean "the peer went away and a fresh connection
//! could fix this". Everything platform specific about recognising them lives in
//! [`classify`]; callers only ever see a [`FailureKind`].

use std::fmt;
use std::io;

/// Which half of the stream an operation used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receiving bytes from the peer.
    Read,
    /// Sending bytes to the peer.
    Write,
}

impl Direction {
    /// Returns a stable lowercase name, suitable for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// End of stream, broken pipe or connection reset: worth a reconnect.
    Transient,
    /// Any other failure: surfaced to the caller unchanged.
    Fatal,
    /// The caller ran out of reconnect-and-retry cycles.
    RetryBudgetExhausted,
}

/// Classifies an I/O error raised while reading or writing.
///
/// Writes never treat end-of-stream as transient; EOF only has a meaning on the
/// read half.
pub fn classify(error: &io::Error, direction: Direction) -> FailureKind {
    match (error.kind(), direction) {
        (io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset, _) => FailureKind::Transient,
        (io::ErrorKind::UnexpectedEof, Direction::Read) => FailureKind::Transient,
        _ => FailureKind::Fatal,
    }
}

/// Turns a zero-length read into an end-of-stream error.
///
/// A read that returns `Ok(0)` into a non-empty buffer means the peer closed its
/// half of the connection. Reads into an empty buffer are passed through.
pub fn classify_eof(result: io::Result<usize>, requested: usize) -> io::Result<usize> {
    match result {
        Ok(0) if requested > 0 => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
        other => other,
    }
}
