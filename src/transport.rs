//! The concrete byte-stream transport: plain TCP, TLS over TCP, or a UNIX domain socket.
//!
//! Grounded on the lineage's `aio/tokio.rs`: one enum dispatching `AsyncRead`/`AsyncWrite` to
//! whichever variant is active, plus `connect_tcp`/`connect_tcp_tls` helpers wrapped in the
//! configured timeouts.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::{fail, Error, ErrorKind, Result};

#[cfg(feature = "tls")]
use tokio_rustls::{client::TlsStream, TlsConnector};

pub enum Transport {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    TcpTls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    pub async fn connect_tcp(
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Transport> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr), ErrorKind::ConnectTimeout).await?;
        stream.set_nodelay(true).ok();
        Ok(Transport::Tcp(stream))
    }

    #[cfg(feature = "tls")]
    pub async fn upgrade_to_tls(
        tcp: TcpStream,
        connector: TlsConnector,
        server_name: rustls_pki_types::ServerName<'static>,
        handshake_timeout: Duration,
    ) -> Result<Transport> {
        let stream = timeout(
            handshake_timeout,
            connector.connect(server_name, tcp),
            ErrorKind::SslHandshakeTimeout,
        )
        .await?;
        Ok(Transport::TcpTls(Box::new(stream)))
    }

    #[cfg(unix)]
    pub async fn connect_unix(
        path: &std::path::Path,
        connect_timeout: Duration,
    ) -> Result<Transport> {
        let stream = timeout(
            connect_timeout,
            UnixStream::connect(path),
            ErrorKind::ConnectTimeout,
        )
        .await?;
        Ok(Transport::Unix(stream))
    }
}

async fn timeout<F, T>(duration: Duration, fut: F, kind: ErrorKind) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::from(e)),
        Err(_) => fail!((kind, "operation timed out")),
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Transport::TcpTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_read(cx, buf),
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
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Transport::TcpTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Transport::TcpTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Transport::TcpTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            Transport::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Resolves a host/port pair honoring `resolve_timeout`, picking the first address returned.
pub async fn resolve(host: &str, port: u16, resolve_timeout: Duration) -> Result<SocketAddr> {
    let lookup = tokio::net::lookup_host((host, port));
    let mut addrs = match tokio::time::timeout(resolve_timeout, lookup).await {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => return Err(Error::from(e)),
        Err(_) => fail!((ErrorKind::ResolveTimeout, "DNS resolution timed out")),
    };
    addrs
        .next()
        .ok_or_else(|| Error::from((ErrorKind::ResolveTimeout, "no addresses returned for host")))
}
