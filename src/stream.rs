//! The byte-stream abstraction every handshake is written against, plus the single-owner
//! socket wrapper that makes cancellation of an in-flight dial safe.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::deadline::Deadline;
use crate::error::Error;

/// Any duplex byte stream a handshake can run over: a raw TCP socket, or the tunnel established
/// by a previous hop in a chain.
///
/// Blanket-implemented for anything that is already [`AsyncRead`] + [`AsyncWrite`] + [`Unpin`] +
/// [`Send`]; callers never implement this by hand.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> AsyncStream for T {}

/// A type-erased stream, used wherever a chain hands the next hop's handshake an
/// already-negotiated tunnel to run over.
pub type BoxedStream = Box<dyn AsyncStream>;

/// A single-owner wrapper around a byte stream whose closure is idempotent.
///
/// Grounded in the cancellation-safety requirement: if a dial is aborted partway through a
/// multi-hop chain, every socket opened so far must be closed exactly once, even if the abort
/// races with an orderly close already in flight. `close` is safe to call from both paths
/// because the guard flag makes the second call a no-op.
pub struct OwnedSocket<T> {
    inner: Option<T>,
    closed: AtomicBool,
}

impl<T> OwnedSocket<T> {
    /// Takes ownership of `inner`.
    pub fn new(inner: T) -> Self {
        Self {
            inner: Some(inner),
            closed: AtomicBool::new(false),
        }
    }

    /// Borrows the underlying stream, if it hasn't been closed yet.
    pub fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Mutably borrows the underlying stream, if it hasn't been closed yet.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }

    /// `true` if [`close`](Self::close) has already run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the socket closed and drops the underlying stream, unless some other path already
    /// did so. Safe to call more than once, including concurrently from a cancellation path and
    /// the happy path's own cleanup.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.take();
        }
    }

    /// Consumes the wrapper, yielding the inner stream if it is still open.
    pub fn into_inner(mut self) -> Option<T> {
        if self.closed.swap(true, Ordering::AcqRel) {
            None
        } else {
            self.inner.take()
        }
    }
}

impl<T> Drop for OwnedSocket<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for OwnedSocket<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"))),
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for OwnedSocket<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_write(cx, buf),
            None => Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Reads exactly `buf.len()` bytes, failing with [`Error::Timeout`] if `deadline` elapses first
/// and [`Error::Io`] on any other I/O failure, including a premature EOF.
pub(crate) async fn read_exact<S: AsyncStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<(), Error> {
    use tokio::io::AsyncReadExt;
    deadline
        .run(async {
            stream.read_exact(buf).await?;
            Ok(())
        })
        .await
}

/// Reads byte-at-a-time until `delimiter` has been seen in full, bounded by `max_len` total
/// bytes. Used to read an HTTP CONNECT response header block, whose length isn't known up
/// front and which the peer may not close promptly after sending.
///
/// Exceeding `max_len` without finding `delimiter` fails with [`Error::InvalidReply`], per the
/// bounded-header-read requirement.
pub(crate) async fn read_until_delimiter<S: AsyncStream + ?Sized>(
    stream: &mut S,
    delimiter: &[u8],
    max_len: usize,
    deadline: &Deadline,
) -> Result<Vec<u8>, Error> {
    use tokio::io::AsyncReadExt;
    deadline
        .run(async {
            let mut out = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                let n = stream.read(&mut byte).await.map_err(Error::Io)?;
                if n == 0 {
                    return Err(Error::InvalidReply(
                        "connection closed before the reply header terminator was seen".into(),
                    ));
                }
                out.push(byte[0]);
                if out.len() > max_len {
                    return Err(Error::InvalidReply(format!(
                        "reply header exceeded the {max_len}-byte limit without a terminator"
                    )));
                }
                if out.ends_with(delimiter) {
                    return Ok(out);
                }
            }
        })
        .await
}

/// Writes the entire buffer, respecting `deadline`.
pub(crate) async fn write_all<S: AsyncStream + ?Sized>(
    stream: &mut S,
    buf: &[u8],
    deadline: &Deadline,
) -> Result<(), Error> {
    use tokio::io::AsyncWriteExt;
    deadline
        .run(async {
            stream.write_all(buf).await.map_err(Error::Io)?;
            stream.flush().await.map_err(Error::Io)?;
            Ok(())
        })
        .await
}
