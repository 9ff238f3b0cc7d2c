use crate::backoff::ExponentialBackoff;
use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::events::{ConnectionEvent, EventListeners};
use crate::state::{ConnectionState, ConnectionStats};
use futures::future::BoxFuture;
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
use resilient_tcp_core::{
    Connection, Direction, FailureKind, TcpConnector, Target, classify, classify_eof,
};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
#[cfg(feature = "metrics")]
use std::sync::Once;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tower::{Service, ServiceExt};

/// A stream connection that re-dials its peer when the transport breaks.
///
/// Reads and writes are forwarded to the active transport connection. When one
/// fails with end-of-stream (reads only), a broken pipe or a connection reset,
/// the connection dials the same peer again, backs off exponentially while the
/// peer is unreachable, and retries the original operation. The caller sees
/// either the eventual success, a fatal error passed through unchanged, or
/// [`Error::RetriesExhausted`].
///
/// All methods take `&self`; share the connection through an `Arc` to read and
/// write from several tasks at once. The local endpoint changes on every
/// reconnect, so do not cache anything derived from the transport handle.
///
/// `T` is the transport connection and `C` the `tower` service that dials it.
/// Both default to plain TCP.
pub struct ResilientConnection<T = TcpStream, C = TcpConnector> {
    slot: RwLock<Slot<T>>,
    connector: C,
    peer: SocketAddr,
    local: Mutex<Option<SocketAddr>>,
    closed: watch::Sender<bool>,
    name: String,
    listeners: EventListeners,
    stats: ConnectionStats,
}

/// Everything the slot lock guards: the active connection and the retry settings.
struct Slot<T> {
    active: Option<T>,
    /// Bumped on every replacement so late reconnects can tell they were superseded.
    generation: u64,
    max_retries: u32,
    retry_interval: Duration,
    call_timeout: Option<Duration>,
}

/// Per-call retry settings, read once under the shared lock.
#[derive(Clone, Copy)]
struct RetrySettings {
    max_retries: u32,
    retry_interval: Duration,
    call_timeout: Option<Duration>,
}

enum Op<'b> {
    Read(&'b mut [u8]),
    Write(&'b [u8]),
}

impl Op<'_> {
    fn direction(&self) -> Direction {
        match self {
            Op::Read(_) => Direction::Read,
            Op::Write(_) => Direction::Write,
        }
    }
}

enum Swap<T> {
    Replaced(T),
    Superseded(T),
    Closed(T),
}

impl<T, C> ResilientConnection<T, C>
where
    T: Connection,
    C: Service<Target, Response = T, Error = io::Error> + Clone + Send + Sync + 'static,
    C::Future: Send,
{
    /// Opens the first connection to `target` through `connector`.
    ///
    /// The first connect is not retried; a failure is returned as
    /// [`Error::Connect`]. Later reconnects dial `target.remote` again without a
    /// local address.
    pub async fn connect(
        connector: C,
        target: Target,
        config: ConnectionConfig,
    ) -> Result<Self, Error> {
        let active = connector
            .clone()
            .oneshot(target)
            .await
            .map_err(|source| Error::Connect {
                addr: target.remote,
                source,
            })?;
        Ok(Self::new(active, connector, target.remote, config))
    }

    /// Wraps an already established connection to `peer`.
    pub fn new(active: T, connector: C, peer: SocketAddr, config: ConnectionConfig) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();

        let ConnectionConfig {
            max_retries,
            retry_interval,
            call_timeout,
            name,
            event_listeners,
        } = config;

        let local = active.local_addr().ok();
        let (closed, _) = watch::channel(false);

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %name, %peer, "connection established");

        Self {
            slot: RwLock::new(Slot {
                active: Some(active),
                generation: 0,
                max_retries,
                retry_interval,
                call_timeout,
            }),
            connector,
            peer,
            local: Mutex::new(local),
            closed,
            name,
            listeners: event_listeners,
            stats: ConnectionStats::new(),
        }
    }

    /// Reads into `buf`, reconnecting on end-of-stream, broken pipe or reset.
    ///
    /// Returns as soon as any bytes arrive; a short read is not retried.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.transfer(Op::Read(buf)).await
    }

    /// Writes from `buf`, reconnecting on broken pipe or reset.
    ///
    /// A partial write is returned as is; resuming it is up to the caller.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        self.transfer(Op::Write(buf)).await
    }

    /// Replaces the active connection with a freshly dialed one.
    ///
    /// The retired connection is closed. On failure the active connection is
    /// left in place.
    pub async fn reconnect(&self) -> Result<(), Error> {
        let result = self.interruptible(None, self.replace(None, 0)).await?;
        if let Err(Error::Connect { .. }) = &result {
            // The previous connection is still in the slot.
            self.stats.set_state(ConnectionState::Connected);
        }
        result
    }

    /// Closes the connection.
    ///
    /// In-flight reads, writes, reconnect dials and backoff sleeps are
    /// interrupted and fail with [`Error::Closed`], as does every later call,
    /// including a second `close`.
    pub async fn close(&self) -> Result<(), Error> {
        if self.closed.send_replace(true) {
            return Err(Error::Closed);
        }

        let active = self.slot.write().await.active.take();
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.stats.set_state(ConnectionState::Closed);

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %self.name, peer = %self.peer, "connection closed");

        self.emit(|| ConnectionEvent::Closed {
            name: self.name.clone(),
            timestamp: std::time::Instant::now(),
        });

        match active {
            Some(active) => active.close().await.map_err(Error::Io),
            None => Err(Error::Closed),
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Returns the remote peer. It never changes across reconnects.
    pub fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Returns the local address of the active connection, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the state and counters of this connection.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.stats.state()
    }

    /// Returns the maximum number of attempts per call.
    pub async fn max_retries(&self) -> u32 {
        self.slot.read().await.max_retries
    }

    /// Sets the maximum number of attempts per call.
    ///
    /// Calls already in progress keep the value they started with.
    ///
    /// Takes the exclusive lock, so this waits for reads and writes in flight
    /// to finish their current attempt. Calls issued meanwhile queue behind it.
    pub async fn set_max_retries(&self, max_retries: u32) {
        self.slot.write().await.max_retries = max_retries;
    }

    /// Returns the base backoff interval.
    pub async fn retry_interval(&self) -> Duration {
        self.slot.read().await.retry_interval
    }

    /// Sets the base backoff interval.
    ///
    /// Takes the exclusive lock, so this waits for reads and writes in flight
    /// to finish their current attempt. Calls issued meanwhile queue behind it.
    pub async fn set_retry_interval(&self, interval: Duration) {
        self.slot.write().await.retry_interval = interval;
    }

    /// Returns the per-call deadline, if any.
    pub async fn call_timeout(&self) -> Option<Duration> {
        self.slot.read().await.call_timeout
    }

    /// Sets or clears the per-call deadline.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    ///
    /// Takes the exclusive lock, so this waits for reads and writes in flight
    /// to finish their current attempt. Calls issued meanwhile queue behind it.
    pub async fn set_call_timeout(&self, timeout: Option<Duration>) {
        self.slot.write().await.call_timeout = timeout;
    }

    async fn settings(&self) -> Result<RetrySettings, Error> {
        let slot = self.slot.read().await;
        if slot.active.is_none() {
            return Err(Error::Closed);
        }
        Ok(RetrySettings {
            max_retries: slot.max_retries,
            retry_interval: slot.retry_interval,
            call_timeout: slot.call_timeout,
        })
    }

    async fn transfer(&self, mut op: Op<'_>) -> Result<usize, Error> {
        let direction = op.direction();
        let settings = self.interruptible(None, self.settings()).await??;
        // A timeout too large to add to the clock is no deadline at all.
        let deadline = settings
            .call_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let mut backoff = ExponentialBackoff::new(settings.retry_interval);
        // Generation of the connection that last failed transiently, until replaced.
        let mut broken: Option<u64> = None;

        for attempt in 1..=settings.max_retries {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Error::DeadlineExceeded);
            }

            if let Some(generation) = broken {
                let dialed = match self
                    .interruptible(deadline, self.replace(Some(generation), attempt))
                    .await
                {
                    Ok(dialed) => dialed,
                    Err(error) => {
                        self.stats.record_abandoned_reconnect();
                        return Err(error);
                    }
                };
                match dialed {
                    Ok(()) => broken = None,
                    Err(Error::Closed) => return Err(Error::Closed),
                    Err(_error) => {
                        let delay = backoff.next_interval();
                        self.stats.record_failed_reconnect();

                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            connection = %self.name,
                            peer = %self.peer,
                            attempt,
                            ?delay,
                            error = %_error,
                            "reconnect failed"
                        );

                        #[cfg(feature = "metrics")]
                        counter!("resilient_tcp_reconnect_failures_total", "connection" => self.name.clone())
                            .increment(1);

                        self.emit(|| ConnectionEvent::ReconnectFailed {
                            name: self.name.clone(),
                            timestamp: std::time::Instant::now(),
                            attempt,
                            delay,
                        });

                        if attempt < settings.max_retries {
                            self.interruptible(deadline, tokio::time::sleep(delay))
                                .await?;
                        }
                        continue;
                    }
                }
            }

            let (generation, result) = self.interruptible(deadline, self.attempt(&mut op)).await??;
            let error = match result {
                Ok(n) => return Ok(n),
                Err(error) => error,
            };

            match classify(&error, direction) {
                FailureKind::Transient => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        connection = %self.name,
                        peer = %self.peer,
                        %direction,
                        attempt,
                        error = %error,
                        "transient failure, reconnecting"
                    );
                    broken = Some(generation);
                }
                _ => {
                    self.stats.record_fatal();

                    #[cfg(feature = "metrics")]
                    counter!(
                        "resilient_tcp_fatal_errors_total",
                        "connection" => self.name.clone(),
                        "direction" => direction.as_str()
                    )
                    .increment(1);

                    self.emit(|| ConnectionEvent::FatalError {
                        name: self.name.clone(),
                        timestamp: std::time::Instant::now(),
                        direction,
                        kind: error.kind(),
                    });
                    return Err(Error::Io(error));
                }
            }
        }

        self.stats.record_exhausted();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            connection = %self.name,
            peer = %self.peer,
            %direction,
            attempts = settings.max_retries,
            "retries exhausted"
        );

        #[cfg(feature = "metrics")]
        counter!(
            "resilient_tcp_retries_exhausted_total",
            "connection" => self.name.clone(),
            "direction" => direction.as_str()
        )
        .increment(1);

        self.emit(|| ConnectionEvent::RetriesExhausted {
            name: self.name.clone(),
            timestamp: std::time::Instant::now(),
            direction,
            attempts: settings.max_retries,
        });

        Err(Error::RetriesExhausted {
            attempts: settings.max_retries,
        })
    }

    /// One I/O attempt against the active connection, under the shared lock.
    async fn attempt(&self, op: &mut Op<'_>) -> Result<(u64, io::Result<usize>), Error> {
        let slot = self.slot.read().await;
        let active = slot.active.as_ref().ok_or(Error::Closed)?;
        let result = match op {
            Op::Read(buf) => {
                let requested = buf.len();
                classify_eof(active.read(buf).await, requested)
            }
            Op::Write(buf) => active.write(buf).await,
        };
        Ok((slot.generation, result))
    }

    /// Dials the peer and swaps the new connection in.
    ///
    /// With `observed`, the swap only happens while the slot still holds that
    /// generation; otherwise another caller already replaced it and the fresh
    /// connection is discarded. The dial runs without holding the lock.
    async fn replace(&self, observed: Option<u64>, attempt: u32) -> Result<(), Error> {
        if let Some(generation) = observed {
            let slot = self.slot.read().await;
            if slot.active.is_none() {
                return Err(Error::Closed);
            }
            if slot.generation != generation {
                return Ok(());
            }
        }

        self.stats.set_state(ConnectionState::Reconnecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %self.name, peer = %self.peer, attempt, "reconnecting");

        let fresh = self
            .connector
            .clone()
            .oneshot(Target::new(self.peer))
            .await
            .map_err(|source| Error::Connect {
                addr: self.peer,
                source,
            })?;
        let fresh_local = fresh.local_addr().ok();

        let swap = {
            let mut guard = self.slot.write().await;
            let slot = &mut *guard;
            let superseded = observed.is_some_and(|generation| generation != slot.generation);
            match slot.active.as_mut() {
                Some(active) if !superseded => {
                    slot.generation += 1;
                    Swap::Replaced(std::mem::replace(active, fresh))
                }
                Some(_) => Swap::Superseded(fresh),
                None => Swap::Closed(fresh),
            }
        };

        let (retired, outcome) = match swap {
            Swap::Replaced(retired) => (retired, Ok(true)),
            Swap::Superseded(unused) => (unused, Ok(false)),
            Swap::Closed(unused) => (unused, Err(Error::Closed)),
        };

        // Once out of the slot, the retired connection's fate no longer matters.
        if let Err(_error) = retired.close().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                connection = %self.name,
                error = %_error,
                "failed to close retired connection"
            );
        }

        if !outcome? {
            self.stats.set_state(ConnectionState::Connected);
            return Ok(());
        }

        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = fresh_local;
        self.stats.record_reconnect();

        #[cfg(feature = "tracing")]
        tracing::info!(
            connection = %self.name,
            peer = %self.peer,
            local = ?fresh_local,
            attempt,
            "reconnected"
        );

        #[cfg(feature = "metrics")]
        counter!("resilient_tcp_reconnects_total", "connection" => self.name.clone()).increment(1);

        self.emit(|| ConnectionEvent::Reconnected {
            name: self.name.clone(),
            timestamp: std::time::Instant::now(),
            attempt,
            peer: self.peer,
        });

        Ok(())
    }

    /// Runs `fut` until it completes, the deadline passes or the connection closes.
    async fn interruptible<F>(&self, deadline: Option<Instant>, fut: F) -> Result<F::Output, Error>
    where
        F: Future,
    {
        let closed = self.closed.subscribe();
        let bounded = async move {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| Error::DeadlineExceeded),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = wait_closed(closed) => Err(Error::Closed),
            output = bounded => output,
        }
    }

    fn emit(&self, event: impl FnOnce() -> ConnectionEvent) {
        if !self.listeners.is_empty() {
            self.listeners.emit(&event());
        }
    }
}

impl<T, C> Connection for ResilientConnection<T, C>
where
    T: Connection,
    C: Service<Target, Response = T, Error = io::Error> + Clone + Send + Sync + 'static,
    C::Future: Send,
{
    fn read<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move { ResilientConnection::read(self, buf).await.map_err(Into::into) })
    }

    fn write<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move { ResilientConnection::write(self, buf).await.map_err(Into::into) })
    }

    fn close(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move { ResilientConnection::close(self).await.map_err(Into::into) })
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        ResilientConnection::local_addr(self)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl<T, C> std::fmt::Debug for ResilientConnection<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConnection")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("closed", &*self.closed.borrow())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Resolves once the close flag is set.
async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        // The sender lives in the connection, so this only fails once it is dropped.
        if closed.changed().await.is_err() {
            return futures::future::pending().await;
        }
    }
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    static DESCRIBE: Once = Once::new();
    DESCRIBE.call_once(|| {
        describe_counter!(
            "resilient_tcp_reconnects_total",
            "Total number of times an active connection was replaced"
        );
        describe_counter!(
            "resilient_tcp_reconnect_failures_total",
            "Total number of failed reconnect dials"
        );
        describe_counter!(
            "resilient_tcp_retries_exhausted_total",
            "Total number of calls that gave up after exhausting their retries"
        );
        describe_counter!(
            "resilient_tcp_fatal_errors_total",
            "Total number of calls that failed with a non-retryable error"
        );
    });
}
