//! Connection dialing - TCP and Unix domain sockets.
//!
//! The client core only needs an established bidirectional byte stream; this
//! module is the thin factory that produces one. PHP-FPM pools usually
//! listen on a Unix socket (`/run/php/php-fpm.sock`), sometimes on loopback
//! TCP (`127.0.0.1:9000`).
//!
//! # Example
//!
//! ```ignore
//! use fcgi_client::transport::{Address, Transport};
//! use std::time::Duration;
//!
//! let stream = Transport::connect(&Address::tcp("127.0.0.1:9000"), Duration::from_secs(5)).await?;
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{FcgiError, Result};

/// Address of a FastCGI server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// TCP host:port, e.g. `127.0.0.1:9000`.
    Tcp(String),
    /// Unix domain socket path, e.g. `/run/php/php-fpm.sock`.
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

impl Address {
    /// TCP address from a host:port string.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Address::Tcp(addr.into())
    }

    /// Unix socket address from a path.
    #[cfg(unix)]
    pub fn unix(path: impl Into<std::path::PathBuf>) -> Self {
        Address::Unix(path.into())
    }
}

/// An established connection to a FastCGI server.
///
/// Wraps either stream kind behind one `AsyncRead + AsyncWrite` type so the
/// client does not need to be generic at the dial site.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Dial the given address, failing with [`FcgiError::Timeout`] if the
    /// connection is not established within `connect_timeout` and
    /// [`FcgiError::Connect`] on any other dial failure.
    pub async fn connect(address: &Address, connect_timeout: Duration) -> Result<Self> {
        let dial = async {
            match address {
                Address::Tcp(addr) => TcpStream::connect(addr).await.map(Transport::Tcp),
                #[cfg(unix)]
                Address::Unix(path) => UnixStream::connect(path).await.map(Transport::Unix),
            }
        };

        match tokio::time::timeout(connect_timeout, dial).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => Err(FcgiError::Connect(err)),
            Err(_) => Err(FcgiError::Timeout {
                phase: "connecting",
            }),
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Transport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
