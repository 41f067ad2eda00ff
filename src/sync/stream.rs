//! The blocking byte-stream abstraction every synchronous handshake runs over, plus the
//! single-owner socket wrapper that gives it the same idempotent-close guarantee as the async
//! path's [`OwnedSocket`](crate::stream::OwnedSocket).

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::deadline::Deadline;
use crate::error::Error;

/// Any duplex byte stream a blocking handshake can run over: a raw [`TcpStream`], or the tunnel
/// established by a previous hop in a [`SyncChain`](crate::sync::SyncChain).
///
/// Blanket-implemented for anything that is already [`Read`] + [`Write`] + [`Send`] and exposes
/// socket-style read/write timeouts; callers never implement this by hand.
pub trait SyncStream: Read + Write + Send {
    /// Sets (or clears, with `None`) the timeout applied to subsequent reads.
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    /// Sets (or clears, with `None`) the timeout applied to subsequent writes.
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

impl SyncStream for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }
}

impl<T: SyncStream + ?Sized> SyncStream for Box<T> {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        (**self).set_write_timeout(dur)
    }
}

/// A type-erased blocking stream, used wherever a chain hands the next hop's handshake an
/// already-negotiated tunnel to run over.
pub type BoxedSyncStream = Box<dyn SyncStream>;

/// A single-owner wrapper around a blocking byte stream whose closure is idempotent. Mirrors
/// [`crate::stream::OwnedSocket`] for the blocking path.
pub(crate) struct SyncOwnedSocket<T> {
    inner: Option<T>,
    closed: AtomicBool,
}

impl<T> SyncOwnedSocket<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            inner: Some(inner),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }

    pub(crate) fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.inner.take();
        }
    }

    pub(crate) fn into_inner(mut self) -> Option<T> {
        if self.closed.swap(true, Ordering::AcqRel) {
            None
        } else {
            self.inner.take()
        }
    }
}

impl<T> Drop for SyncOwnedSocket<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

impl<T: Read> Read for SyncOwnedSocket<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(not_connected()),
        }
    }
}

impl<T: Write> Write for SyncOwnedSocket<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.write(buf),
            None => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<T: SyncStream> SyncStream for SyncOwnedSocket<T> {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self.inner.as_ref() {
            Some(inner) => inner.set_read_timeout(dur),
            None => Ok(()),
        }
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self.inner.as_ref() {
            Some(inner) => inner.set_write_timeout(dur),
            None => Ok(()),
        }
    }
}

fn map_io(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}

fn apply_deadline<S: SyncStream + ?Sized>(stream: &mut S, deadline: &Deadline) -> Result<(), Error> {
    match deadline.remaining() {
        None => {
            stream.set_read_timeout(None).map_err(Error::Io)?;
            stream.set_write_timeout(None).map_err(Error::Io)?;
        }
        Some(d) if d.is_zero() => return Err(Error::Timeout),
        Some(d) => {
            stream.set_read_timeout(Some(d)).map_err(Error::Io)?;
            stream.set_write_timeout(Some(d)).map_err(Error::Io)?;
        }
    }
    Ok(())
}

/// Reads exactly `buf.len()` bytes, failing with [`Error::Timeout`] if `deadline` elapses first
/// and [`Error::UnexpectedEof`] if the peer closes early.
pub(crate) fn read_exact<S: SyncStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: &Deadline,
) -> Result<(), Error> {
    apply_deadline(stream, deadline)?;
    stream.read_exact(buf).map_err(map_io)
}

/// Reads byte-at-a-time until `delimiter` has been seen in full, bounded by `max_len` total
/// bytes. The blocking counterpart of [`crate::stream::read_until_delimiter`].
pub(crate) fn read_until_delimiter<S: SyncStream + ?Sized>(
    stream: &mut S,
    delimiter: &[u8],
    max_len: usize,
    deadline: &Deadline,
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        apply_deadline(stream, deadline)?;
        let n = stream.read(&mut byte).map_err(map_io)?;
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
}

/// Writes the entire buffer, respecting `deadline`.
pub(crate) fn write_all<S: SyncStream + ?Sized>(
    stream: &mut S,
    buf: &[u8],
    deadline: &Deadline,
) -> Result<(), Error> {
    apply_deadline(stream, deadline)?;
    stream.write_all(buf).map_err(map_io)?;
    stream.flush().map_err(map_io)
}
