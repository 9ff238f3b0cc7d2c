//! Backoff schedule between failed reconnect attempts.

use std::time::Duration;

/// Exponential backoff with a factor of two and no ceiling.
///
/// A schedule lives for exactly one read or write call, so every call starts
/// again from the base interval. Intervals saturate at [`Duration::MAX`] instead
/// of overflowing.
///
/// # Examples
///
/// ```
/// use resilient_tcp::ExponentialBackoff;
/// use std::time::Duration;
///
/// let mut backoff = ExponentialBackoff::new(Duration::from_millis(100));
/// assert_eq!(backoff.next_interval(), Duration::from_millis(100));
/// assert_eq!(backoff.next_interval(), Duration::from_millis(200));
/// assert_eq!(backoff.next_interval(), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a schedule starting at `base`.
    pub fn new(base: Duration) -> Self {
        Self { current: base }
    }

    /// Returns the current interval and doubles it for the next call.
    pub fn next_interval(&mut self) -> Duration {
        let interval = self.current;
        self.current = self.current.checked_mul(2).unwrap_or(Duration::MAX);
        interval
    }

    /// Sum of the first `sleeps` intervals starting at `base`:
    /// `base * (2^sleeps - 1)`.
    ///
    /// A call that gives up after `n` failed reconnects has slept `total(base, n - 1)`.
    pub fn total(base: Duration, sleeps: u32) -> Duration {
        let mut schedule = Self::new(base);
        (0..sleeps).fold(Duration::ZERO, |total, _| {
            total.saturating_add(schedule.next_interval())
        })
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_interval())
    }
}
