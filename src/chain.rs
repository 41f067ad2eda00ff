//! Composing a non-empty ordered list of proxy hops into one tunneled stream.

use crate::deadline::Deadline;
use crate::engine::ProxyEngine;
use crate::error::Error;
use crate::resolve::Resolve;
use crate::stream::BoxedStream;
use crate::url::{Endpoint, ProxyDescriptor};

/// An ordered sequence of proxy hops dialed back-to-back, each hop's handshake running over the
/// tunnel the previous hop established.
#[derive(Debug, Clone)]
pub struct Chain<R> {
    engine: ProxyEngine<R>,
    hops: Vec<ProxyDescriptor>,
}

impl<R: Resolve> Chain<R> {
    /// Builds a chain from a non-empty list of hops, dialed in order.
    ///
    /// `hops` is empty is a programmer error the caller must not make; [`connect`](Self::connect)
    /// documents the resulting panic.
    pub fn new(resolver: R, hops: Vec<ProxyDescriptor>) -> Self {
        Self {
            engine: ProxyEngine::new(resolver),
            hops,
        }
    }

    /// Dials every hop in order and returns the stream established through the last one,
    /// positioned immediately after the final hop's handshake with `destination`.
    ///
    /// Each hop `i`'s handshake targets hop `i+1`'s own endpoint (or `destination` for the final
    /// hop) and runs over hop `i-1`'s already-established tunnel; no intermediate hop's address
    /// is re-resolved once the chain starts. On any hop's failure the in-progress stream is
    /// closed, which propagates EOF back through every earlier hop.
    ///
    /// # Panics
    ///
    /// Panics if `hops` was empty.
    pub async fn connect(&self, destination: &Endpoint, deadline: &Deadline) -> Result<BoxedStream, Error> {
        assert!(!self.hops.is_empty(), "a proxy chain must have at least one hop");

        let targets = self.targets(destination);

        let mut stream = self
            .engine
            .dial(&self.hops[0], &targets[0], None, deadline)
            .await?;

        for i in 1..self.hops.len() {
            stream = self
                .engine
                .dial(&self.hops[i], &targets[i], Some(stream), deadline)
                .await?;
        }

        Ok(stream)
    }

    fn targets(&self, destination: &Endpoint) -> Vec<Endpoint> {
        let n = self.hops.len();
        let mut targets = Vec::with_capacity(n);
        for i in 0..n - 1 {
            let next = self.hops[i + 1].endpoint();
            targets.push(Endpoint::new(next.host().to_owned(), next.port()));
        }
        targets.push(Endpoint::new(destination.host().to_owned(), destination.port()));
        targets
    }
}
