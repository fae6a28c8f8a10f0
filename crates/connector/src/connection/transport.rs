use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// A byte stream a processor can be bound to.
///
/// Blocking-style reads and writes are expressed as awaited futures under a
/// timeout; the non-blocking write path polls the same stream once and
/// resumes later.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl Transport for DuplexStream {}

/// The connection's stream while a request is in service.
///
/// Both the exchange and the write pump drive the stream from the same
/// task. The lock is only held for a single poll.
pub struct SharedTransport<'a> {
    inner: Mutex<&'a mut dyn Transport>,
}

impl std::fmt::Debug for SharedTransport<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}

impl<'a> SharedTransport<'a> {
    pub fn new(stream: &'a mut dyn Transport) -> Self {
        Self { inner: Mutex::new(stream) }
    }

    pub fn handle(&self) -> TransportHandle<'_, 'a> {
        TransportHandle(self)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).peer_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).local_addr()
    }
}

/// A borrowed reader and writer over a [`SharedTransport`].
#[derive(Debug, Clone, Copy)]
pub struct TransportHandle<'s, 'a>(&'s SharedTransport<'a>);

impl<'a> TransportHandle<'_, 'a> {
    fn lock(&self) -> MutexGuard<'_, &'a mut dyn Transport> {
        self.0.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsyncRead for TransportHandle<'_, '_> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self.lock()).poll_read(cx, buf)
    }
}

impl AsyncWrite for TransportHandle<'_, '_> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut **self.lock()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self.lock()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut **self.lock()).poll_shutdown(cx)
    }
}
