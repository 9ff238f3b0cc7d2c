//! Shared peers, transports and connectors.

use futures::future::BoxFuture;
use resilient_tcp::{Connection, Target};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tower::Service;

/// Sent by [`Peer`] to every new connection before echoing.
pub(crate) const GREETING: &[u8] = b"hello, world!";

/// A loopback TCP peer that greets each connection and then echoes.
///
/// Stopping the peer drops the listener and every accepted connection, so
/// clients see end of stream or a reset and new dials are refused until the
/// peer is started again on the same address.
pub(crate) struct Peer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Peer {
    pub(crate) async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    pub(crate) async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => continue,
                };
                sessions.spawn(async move {
                    if stream.write_all(GREETING).await.is_err() {
                        return;
                    }
                    let mut buf = [0u8; 1024];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        Self { addr, task }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the peer and waits until its listener is gone.
    pub(crate) async fn stop(self) -> SocketAddr {
        self.task.abort();
        let _ = self.task.await;
        self.addr
    }

    /// Starts a peer on `addr` once `delay` has passed.
    pub(crate) fn restart_after(addr: SocketAddr, delay: Duration) -> JoinHandle<Peer> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Peer::start_on(addr).await
        })
    }
}

/// Reads from `conn` until exactly `n` bytes have arrived.
pub(crate) async fn read_n<C: Connection + ?Sized>(conn: &C, n: usize) -> io::Result<Vec<u8>> {
    let mut out = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        filled += conn.read(&mut out[filled..]).await?;
    }
    Ok(out)
}

pub(crate) fn peer_addr() -> SocketAddr {
    "127.0.0.1:7000".parse().unwrap()
}

/// In-memory transport that fails every call with `failure`, or succeeds.
///
/// End of stream is modelled as a zero-byte read, the way a real socket
/// reports it.
pub(crate) struct Scripted {
    failure: Option<io::ErrorKind>,
    delay: Option<Duration>,
    closed: Arc<AtomicUsize>,
}

impl Scripted {
    pub(crate) fn healthy(closed: &Arc<AtomicUsize>) -> Self {
        Self {
            failure: None,
            delay: None,
            closed: Arc::clone(closed),
        }
    }

    pub(crate) fn failing(kind: io::ErrorKind, closed: &Arc<AtomicUsize>) -> Self {
        Self {
            failure: Some(kind),
            delay: None,
            closed: Arc::clone(closed),
        }
    }

    /// Every call succeeds after sleeping for `delay`.
    pub(crate) fn slow(delay: Duration, closed: &Arc<AtomicUsize>) -> Self {
        Self {
            failure: None,
            delay: Some(delay),
            closed: Arc::clone(closed),
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Connection for Scripted {
    fn read<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            self.pause().await;
            match self.failure {
                Some(io::ErrorKind::UnexpectedEof) => Ok(0),
                Some(kind) => Err(io::Error::from(kind)),
                None => {
                    let n = GREETING.len().min(buf.len());
                    buf[..n].copy_from_slice(&GREETING[..n]);
                    Ok(n)
                }
            }
        })
    }

    fn write<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            self.pause().await;
            match self.failure {
                Some(kind) => Err(io::Error::from(kind)),
                None => Ok(buf.len()),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, io::Result<()>> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(peer_addr())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok("127.0.0.1:40000".parse().unwrap())
    }
}

/// What the next dial of a [`ScriptedConnector`] produces.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Dial {
    Healthy,
    Refused,
    Failing(io::ErrorKind),
    Hang,
}

/// Connector that follows a plan of dial outcomes, then keeps dialing
/// healthy connections once the plan runs out.
#[derive(Clone)]
pub(crate) struct ScriptedConnector {
    plan: Arc<Mutex<VecDeque<Dial>>>,
    pub(crate) dials: Arc<AtomicUsize>,
    pub(crate) closed: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new(plan: impl IntoIterator<Item = Dial>) -> Self {
        Self {
            plan: Arc::new(Mutex::new(plan.into_iter().collect())),
            dials: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Service<Target> for ScriptedConnector {
    type Response = Scripted;
    type Error = io::Error;
    type Future = BoxFuture<'static, io::Result<Scripted>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _target: Target) -> Self::Future {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let next = self
            .plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Dial::Healthy);
        let closed = Arc::clone(&self.closed);

        Box::pin(async move {
            match next {
                Dial::Healthy => Ok(Scripted::healthy(&closed)),
                Dial::Refused => Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "mock connection refused",
                )),
                Dial::Failing(kind) => Ok(Scripted::failing(kind, &closed)),
                Dial::Hang => futures::future::pending().await,
            }
        })
    }
}
