//! A single deadline that threads through an entire dial: TCP connect plus every handshake
//! phase, per [`ProxyEngine::connect`](crate::ProxyEngine::connect).

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Error;

/// An absolute instant after which an in-progress dial must fail with [`Error::Timeout`], or
/// no deadline at all.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline: operations run until they complete or the stream errors on its own.
    pub const fn none() -> Self {
        Self(None)
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// A deadline at the given absolute instant.
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// The remaining time budget, or `None` if there is no deadline.
    ///
    /// Returns `Some(Duration::ZERO)` rather than going negative once the deadline has passed,
    /// so callers can distinguish "no deadline" from "deadline already elapsed".
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Runs `fut` to completion, or fails with [`Error::Timeout`] if the deadline elapses first.
    pub(crate) async fn run<F, T>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        match self.0 {
            None => fut.await,
            Some(_) => {
                let remaining = match self.remaining() {
                    Some(d) if d.is_zero() => return Err(Error::Timeout),
                    Some(d) => d,
                    None => return fut.await,
                };
                match tokio::time::timeout(remaining, fut).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(Error::Timeout),
                }
            }
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
