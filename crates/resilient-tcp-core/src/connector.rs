//! Opening transport connections.
//!
//! [`TcpConnector`] is a `tower` service from [`Target`] to [`TcpStream`]. The
//! reconnecting connection only relies on that shape, so tests and alternative
//! transports can plug in any service that produces a [`Connection`](crate::Connection).

use futures::future::BoxFuture;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::net::{TcpSocket, TcpStream};
use tower::Service;

/// Stream-oriented IP network kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// IPv4 or IPv6.
    #[default]
    Tcp,
    /// IPv4 only.
    Tcp4,
    /// IPv6 only.
    Tcp6,
}

impl Network {
    /// Returns whether `addr` belongs to this network's address family.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }

    /// Returns the canonical name (`"tcp"`, `"tcp4"` or `"tcp6"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a network name other than `tcp`, `tcp4` or `tcp6`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network {0:?}, expected \"tcp\", \"tcp4\" or \"tcp6\"")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}

/// Resolves `address` (`host:port`) to a socket address of `network`'s family.
///
/// For [`Network::Tcp`] an IPv4 address is preferred when the name has one.
pub async fn resolve(network: Network, address: &str) -> io::Result<SocketAddr> {
    let candidates = tokio::net::lookup_host(address).await?;
    select(network, candidates).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {network} address found for {address}"),
        )
    })
}

/// Picks the address to dial among resolved `candidates`, in resolver order.
fn select(
    network: Network,
    candidates: impl IntoIterator<Item = SocketAddr>,
) -> Option<SocketAddr> {
    let mut fallback = None;
    for addr in candidates {
        if !network.accepts(&addr) {
            continue;
        }
        if network != Network::Tcp || addr.is_ipv4() {
            return Some(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback
}

/// Where to connect, and optionally which local address to bind first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// Local address to bind before connecting. `None` lets the system choose.
    pub local: Option<SocketAddr>,
    /// Remote peer.
    pub remote: SocketAddr,
}

impl Target {
    /// Creates a target with a system-chosen local address.
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            local: None,
            remote,
        }
    }

    /// Binds the given local address before connecting.
    pub fn with_local(mut self, local: SocketAddr) -> Self {
        self.local = Some(local);
        self
    }
}

/// Opens plain TCP connections.
///
/// Connections carry default socket options; nothing configured on a previous
/// connection is carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Creates a new connector.
    pub fn new() -> Self {
        Self
    }
}

impl Service<Target> for TcpConnector {
    type Response = TcpStream;
    type Error = io::Error;
    type Future = BoxFuture<'static, io::Result<TcpStream>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, target: Target) -> Self::Future {
        Box::pin(connect(target))
    }
}

async fn connect(target: Target) -> io::Result<TcpStream> {
    let Some(local) = target.local else {
        return TcpStream::connect(target.remote).await;
    };

    let socket = if local.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.bind(local)?;
    socket.connect(target.remote).await
}
