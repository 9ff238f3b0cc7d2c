//! The stream-connection contract shared by plain and reconnecting connections.

use futures::future::BoxFuture;
use std::io;
use std::net::{Shutdown, SocketAddr};
use tokio::net::TcpStream;

/// A bidirectional byte-stream connection.
///
/// All operations take `&self`, so one connection can serve a reader and a writer
/// concurrently. Futures are boxed to keep the trait object safe and `Send`.
///
/// Partial transfers follow ordinary stream semantics: `read` and `write` return
/// how many bytes moved and it is up to the caller to resume.
pub trait Connection: Send + Sync + 'static {
    /// Receives bytes into `buf`, returning how many were read.
    ///
    /// `Ok(0)` with a non-empty buffer means the peer closed its write half.
    fn read<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Sends bytes from `buf`, returning how many were written.
    fn write<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Shuts the connection down in both directions.
    fn close(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Returns the address of the remote peer.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Returns the local address of the connection.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Connection for TcpStream {
    fn read<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            if buf.is_empty() {
                return Ok(0);
            }
            loop {
                self.readable().await?;
                match self.try_read(buf) {
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    result => return result,
                }
            }
        })
    }

    fn write<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            if buf.is_empty() {
                return Ok(0);
            }
            loop {
                self.writable().await?;
                match self.try_write(buf) {
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    result => return result,
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            // A socket the peer already tore down has nothing left to shut down.
            match socket2::SockRef::from(self).shutdown(Shutdown::Both) {
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                other => other,
            }
        })
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }
}
