use crate::connection::ResilientConnection;
use crate::error::Error;
use crate::events::{ConnectionEvent, EventListener, EventListeners};
use resilient_tcp_core::{Direction, Network, TcpConnector, Target, resolve};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Default number of attempts per read or write call.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff before the first retry after a failed reconnect.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`ResilientConnection`].
///
/// Retry settings given here are only the starting values; they can be changed
/// on a live connection with [`ResilientConnection::set_max_retries`] and
/// friends.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub(crate) max_retries: u32,
    pub(crate) retry_interval: Duration,
    pub(crate) call_timeout: Option<Duration>,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners,
}

impl ConnectionConfig {
    /// Creates a new builder with default settings.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Returns the maximum number of attempts per call.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the base backoff interval.
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Returns the deadline applied to each read or write call, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Returns the connection name used in events, logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dials `address` on `network` and wraps the connection with this configuration.
    ///
    /// `network` must be `"tcp"`, `"tcp4"` or `"tcp6"`. Only the first connect
    /// happens here and it is not retried.
    pub async fn dial(self, network: &str, address: &str) -> Result<ResilientConnection, Error> {
        let network: Network = network.parse()?;
        let remote = resolve(network, address)
            .await
            .map_err(|source| Error::AddressResolution {
                address: address.to_string(),
                source,
            })?;
        ResilientConnection::connect(TcpConnector::new(), Target::new(remote), self).await
    }

    /// Dials `remote` on `network`, binding `local` first when given.
    ///
    /// Reconnects never reuse `local`; they always let the system pick the
    /// local endpoint.
    pub async fn dial_with_local(
        self,
        network: &str,
        local: Option<SocketAddr>,
        remote: SocketAddr,
    ) -> Result<ResilientConnection, Error> {
        let network: Network = network.parse()?;
        for addr in local.iter().chain(Some(&remote)) {
            if !network.accepts(addr) {
                return Err(Error::AddressResolution {
                    address: addr.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{addr} is not a {network} address"),
                    ),
                });
            }
        }

        let mut target = Target::new(remote);
        target.local = local;
        ResilientConnection::connect(TcpConnector::new(), target, self).await
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfigBuilder::default().build()
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("max_retries", &self.max_retries)
            .field("retry_interval", &self.retry_interval)
            .field("call_timeout", &self.call_timeout)
            .field("name", &self.name)
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
pub struct ConnectionConfigBuilder {
    max_retries: u32,
    retry_interval: Duration,
    call_timeout: Option<Duration>,
    name: String,
    event_listeners: EventListeners,
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - max_retries: 5
    /// - retry_interval: 100ms
    /// - call_timeout: none
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            call_timeout: None,
            name: "<unnamed>".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the maximum number of attempts per read or write call.
    ///
    /// The first I/O attempt counts, so `max_retries(5)` allows up to four
    /// reconnects. Zero makes every call give up before doing any I/O.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff before the first retry after a failed reconnect.
    ///
    /// The interval doubles after every further failed reconnect within the
    /// same call and starts over on the next call.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Bounds the total time a single read or write call may take, including
    /// reconnects and backoff.
    ///
    /// # Examples
    ///
    /// ```
    /// use resilient_tcp::ConnectionConfig;
    /// use std::time::Duration;
    ///
    /// let config = ConnectionConfig::builder()
    ///     .call_timeout(Duration::from_secs(2))
    ///     .build();
    /// assert_eq!(config.call_timeout(), Some(Duration::from_secs(2)));
    /// ```
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Removes any call deadline.
    pub fn no_call_timeout(mut self) -> Self {
        self.call_timeout = None;
        self
    }

    /// Sets the name for this connection (used in events, logs and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a listener for every [`ConnectionEvent`].
    pub fn add_listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Registers a callback for successful reconnects.
    ///
    /// # Callback Signature
    /// `Fn(u32)` - Called with the attempt number that reconnected.
    ///
    /// # Examples
    ///
    /// ```
    /// use resilient_tcp::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::builder()
    ///     .on_reconnect(|attempt| {
    ///         println!("reconnected on attempt {}", attempt);
    ///     })
    ///     .build();
    /// ```
    pub fn on_reconnect<F>(self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.add_listener(move |event: &ConnectionEvent| {
            if let ConnectionEvent::Reconnected { attempt, .. } = event {
                f(*attempt);
            }
        })
    }

    /// Registers a callback for failed reconnects.
    ///
    /// # Callback Signature
    /// `Fn(u32, Duration)` - Called with the attempt number and the backoff
    /// about to be slept.
    pub fn on_reconnect_failed<F>(self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.add_listener(move |event: &ConnectionEvent| {
            if let ConnectionEvent::ReconnectFailed { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        })
    }

    /// Registers a callback for calls that exhausted their retries.
    ///
    /// # Callback Signature
    /// `Fn(u32)` - Called with the number of attempts made.
    pub fn on_retries_exhausted<F>(self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.add_listener(move |event: &ConnectionEvent| {
            if let ConnectionEvent::RetriesExhausted { attempts, .. } = event {
                f(*attempts);
            }
        })
    }

    /// Registers a callback for non-retryable errors.
    ///
    /// # Callback Signature
    /// `Fn(Direction, io::ErrorKind)` - Called with the failing direction and error kind.
    pub fn on_fatal_error<F>(self, f: F) -> Self
    where
        F: Fn(Direction, io::ErrorKind) + Send + Sync + 'static,
    {
        self.add_listener(move |event: &ConnectionEvent| {
            if let ConnectionEvent::FatalError {
                direction, kind, ..
            } = event
            {
                f(*direction, *kind);
            }
        })
    }

    /// Builds the configuration.
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            max_retries: self.max_retries,
            retry_interval: self.retry_interval,
            call_timeout: self.call_timeout,
            name: self.name,
            event_listeners: self.event_listeners,
        }
    }
}
