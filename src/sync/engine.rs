//! The blocking counterpart of [`crate::engine::ProxyEngine`]: a per-hop dial driver built on
//! [`std::net::TcpStream`] instead of `tokio`.

use std::io;
use std::net::{SocketAddr, TcpStream};

use crate::addr::classify;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::resolve::FamilyHint;
use crate::sync::resolve::SyncResolve;
use crate::sync::stream::{BoxedSyncStream, SyncOwnedSocket};
use crate::sync::{socks4, socks5, tunnel};
use crate::url::{Endpoint, ProxyDescriptor, ProxyKind};

/// Drives a single hop of a blocking dial: connect (or reuse an existing tunnel), then hand off
/// to the handshake matching `descriptor.kind()`. Mirrors [`crate::engine::ProxyEngine`].
#[derive(Debug, Clone)]
pub struct SyncProxyEngine<R> {
    resolver: R,
}

impl<R: SyncResolve> SyncProxyEngine<R> {
    /// Builds an engine that uses `resolver` for every local-DNS lookup it performs.
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Dials one hop. See [`crate::engine::ProxyEngine::dial`] for the behavior this mirrors.
    pub fn dial(
        &self,
        descriptor: &ProxyDescriptor,
        target: &Endpoint,
        underlying: Option<BoxedSyncStream>,
        deadline: &Deadline,
    ) -> Result<BoxedSyncStream, Error> {
        let stream = match underlying {
            Some(stream) => stream,
            None => Box::new(self.dial_tcp(descriptor.endpoint(), deadline)?) as BoxedSyncStream,
        };

        let mut owned = SyncOwnedSocket::new(stream);
        match self.run_handshake(&mut owned, descriptor, target, deadline) {
            Ok(()) => owned.into_inner().ok_or(Error::UnexpectedEof),
            Err(e) => {
                owned.close();
                Err(e)
            }
        }
    }

    fn run_handshake(
        &self,
        stream: &mut SyncOwnedSocket<BoxedSyncStream>,
        descriptor: &ProxyDescriptor,
        target: &Endpoint,
        deadline: &Deadline,
    ) -> Result<(), Error> {
        let io = stream.get_mut().ok_or(Error::UnexpectedEof)?;
        match descriptor.kind() {
            ProxyKind::Socks4 => socks4::handshake(
                io,
                target,
                descriptor.credentials(),
                descriptor.rdns(),
                &self.resolver,
                deadline,
            ),
            ProxyKind::Socks5 => socks5::handshake(
                io,
                target,
                descriptor.credentials(),
                descriptor.rdns(),
                &self.resolver,
                deadline,
            ),
            ProxyKind::HttpConnect => tunnel::handshake(io, target, descriptor.credentials(), deadline),
        }
    }

    fn dial_tcp(&self, proxy: &Endpoint, deadline: &Deadline) -> Result<TcpStream, Error> {
        let addr = self.resolve_proxy_host(proxy)?;
        match deadline.remaining() {
            None => TcpStream::connect(addr).map_err(Error::ProxyConnectError),
            Some(d) if d.is_zero() => Err(Error::Timeout),
            Some(d) => TcpStream::connect_timeout(&addr, d).map_err(|e| {
                if e.kind() == io::ErrorKind::TimedOut {
                    Error::Timeout
                } else {
                    Error::ProxyConnectError(e)
                }
            }),
        }
    }

    fn resolve_proxy_host(&self, proxy: &Endpoint) -> Result<SocketAddr, Error> {
        let ip = match classify(proxy.host()) {
            crate::addr::HostLiteral::V4(v4) => std::net::IpAddr::V4(v4),
            crate::addr::HostLiteral::V6(v6) => std::net::IpAddr::V6(v6),
            crate::addr::HostLiteral::Name(name) => {
                self.resolver.resolve(&name, FamilyHint::Unspecified)?.addr()
            }
        };
        Ok(SocketAddr::new(ip, proxy.port()))
    }
}
