//! The blocking counterpart of the crate's async dial path.
//!
//! Enabled by the `sync` feature (on by default). Every handshake here runs over
//! [`std::net::TcpStream`] with `SO_RCVTIMEO`/`SO_SNDTIMEO` derived from the
//! [`Deadline`](crate::Deadline) instead of a `tokio` runtime, for callers that dial proxies
//! from plain blocking code. The wire-encoding helpers in [`crate::addr`] (host classification,
//! IDNA encoding, port packing) are shared verbatim with the async path; only the I/O plumbing
//! and the handshake sequencing are duplicated, since the async handshakes interleave `.await`
//! points around resolver calls that a blocking call stack can't share directly.

mod engine;
mod socks4;
mod socks5;
mod stream;
mod tunnel;

pub mod resolve;

pub use self::engine::SyncProxyEngine;
pub use self::stream::{BoxedSyncStream, SyncStream};

use crate::deadline::Deadline;
use crate::error::Error;
use crate::url::{Endpoint, ProxyDescriptor};
use resolve::SyncResolve;

/// An ordered sequence of proxy hops dialed back-to-back over blocking sockets, the blocking
/// counterpart of [`crate::Chain`].
#[derive(Debug, Clone)]
pub struct SyncChain<R> {
    engine: SyncProxyEngine<R>,
    hops: Vec<ProxyDescriptor>,
}

impl<R: SyncResolve> SyncChain<R> {
    /// Builds a chain from a non-empty list of hops, dialed in order.
    pub fn new(resolver: R, hops: Vec<ProxyDescriptor>) -> Self {
        Self {
            engine: SyncProxyEngine::new(resolver),
            hops,
        }
    }

    /// Dials every hop in order and returns the stream established through the last one.
    ///
    /// See [`crate::Chain::connect`] for the sequencing invariant this mirrors.
    ///
    /// # Panics
    ///
    /// Panics if the chain was built with no hops.
    pub fn connect(&self, destination: &Endpoint, deadline: &Deadline) -> Result<BoxedSyncStream, Error> {
        assert!(!self.hops.is_empty(), "a proxy chain must have at least one hop");

        let targets = self.targets(destination);

        let mut stream = self.engine.dial(&self.hops[0], &targets[0], None, deadline)?;
        for i in 1..self.hops.len() {
            stream = self.engine.dial(&self.hops[i], &targets[i], Some(stream), deadline)?;
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

/// Dials `destination` through `hops` over blocking sockets, the blocking counterpart of
/// [`crate::connect`].
pub fn connect<R: SyncResolve>(
    hops: Vec<ProxyDescriptor>,
    destination: &Endpoint,
    deadline: &Deadline,
    resolver: R,
) -> Result<BoxedSyncStream, Error> {
    SyncChain::new(resolver, hops).connect(destination, deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::resolve::StdResolver;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn single_hop_chain_behaves_like_a_direct_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = [0u8; 9];
            sock.read_exact(&mut req).unwrap();
            sock.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let descriptor = ProxyDescriptor::parse(&format!("socks4://{proxy_addr}")).unwrap();
        let chain = SyncChain::new(StdResolver::new(), vec![descriptor]);
        let destination = Endpoint::new("93.184.216.34", 80);

        let stream = chain.connect(&destination, &Deadline::none()).unwrap();
        drop(stream);
        server.join().unwrap();
    }

    #[test]
    fn two_hop_chain_multiplexes_second_handshake_over_first_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            for _ in 0..2 {
                let mut req_head = [0u8; 8];
                sock.read_exact(&mut req_head).unwrap();
                let mut byte = [0u8; 1];
                loop {
                    sock.read_exact(&mut byte).unwrap();
                    if byte[0] == 0 {
                        break;
                    }
                }
                sock.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).unwrap();
            }
        });

        let hop0 = ProxyDescriptor::parse(&format!("socks4://{proxy_addr}")).unwrap();
        let hop1 = ProxyDescriptor::parse("socks4://203.0.113.1:9").unwrap();
        let chain = SyncChain::new(StdResolver::new(), vec![hop0, hop1]);
        let destination = Endpoint::new("93.184.216.34", 80);

        let stream = chain.connect(&destination, &Deadline::none()).unwrap();
        drop(stream);
        server.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "at least one hop")]
    fn empty_chain_panics() {
        let chain: SyncChain<StdResolver> = SyncChain::new(StdResolver::new(), vec![]);
        let destination = Endpoint::new("93.184.216.34", 80);
        let _ = chain.connect(&destination, &Deadline::none());
    }
}
