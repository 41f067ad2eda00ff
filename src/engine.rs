//! The per-hop dial driver: opens (or reuses) a transport and runs the handshake matching a
//! descriptor's [`ProxyKind`].

use std::net::SocketAddr;

use tokio::net::TcpStream;

use crate::addr::classify;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::resolve::{FamilyHint, Name, Resolve};
use crate::stream::{BoxedStream, OwnedSocket};
use crate::url::{Endpoint, ProxyDescriptor, ProxyKind};
use crate::{socks4, socks5, tunnel};

/// Drives a single hop of a dial: connect (or reuse an existing tunnel), then hand off to the
/// handshake matching `descriptor.kind()`.
#[derive(Debug, Clone)]
pub struct ProxyEngine<R> {
    resolver: R,
}

impl<R: Resolve> ProxyEngine<R> {
    /// Builds an engine that uses `resolver` for every local-DNS lookup it performs.
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Dials one hop.
    ///
    /// If `underlying` is `None`, a fresh TCP connection to `descriptor`'s own host is opened
    /// first (resolving its hostname if needed). Otherwise `underlying` — an already-established
    /// tunnel from a previous hop — is used as the transport and no new socket is created. Either
    /// way, the handshake for `descriptor.kind()` then runs against `target`, and on any failure
    /// the transport is closed before the error is returned.
    pub async fn dial(
        &self,
        descriptor: &ProxyDescriptor,
        target: &Endpoint,
        underlying: Option<BoxedStream>,
        deadline: &Deadline,
    ) -> Result<BoxedStream, Error> {
        let stream = match underlying {
            Some(stream) => stream,
            None => Box::new(self.dial_tcp(descriptor.endpoint(), deadline).await?) as BoxedStream,
        };

        let mut owned = OwnedSocket::new(stream);
        match self.run_handshake(&mut owned, descriptor, target, deadline).await {
            Ok(()) => owned.into_inner().ok_or(Error::UnexpectedEof),
            Err(e) => {
                owned.close();
                Err(e)
            }
        }
    }

    async fn run_handshake(
        &self,
        stream: &mut OwnedSocket<BoxedStream>,
        descriptor: &ProxyDescriptor,
        target: &Endpoint,
        deadline: &Deadline,
    ) -> Result<(), Error> {
        let io = stream.get_mut().ok_or(Error::UnexpectedEof)?;
        match descriptor.kind() {
            ProxyKind::Socks4 => {
                socks4::handshake(
                    io,
                    target,
                    descriptor.credentials(),
                    descriptor.rdns(),
                    &self.resolver,
                    deadline,
                )
                .await
            }
            ProxyKind::Socks5 => {
                socks5::handshake(
                    io,
                    target,
                    descriptor.credentials(),
                    descriptor.rdns(),
                    &self.resolver,
                    deadline,
                )
                .await
            }
            ProxyKind::HttpConnect => {
                tunnel::handshake(io, target, descriptor.credentials(), deadline).await
            }
        }
    }

    async fn dial_tcp(&self, proxy: &Endpoint, deadline: &Deadline) -> Result<TcpStream, Error> {
        let addr = self.resolve_proxy_host(proxy, deadline).await?;
        deadline
            .run(async { TcpStream::connect(addr).await.map_err(Error::ProxyConnectError) })
            .await
    }

    async fn resolve_proxy_host(&self, proxy: &Endpoint, deadline: &Deadline) -> Result<SocketAddr, Error> {
        let ip = match classify(proxy.host()) {
            crate::addr::HostLiteral::V4(v4) => std::net::IpAddr::V4(v4),
            crate::addr::HostLiteral::V6(v6) => std::net::IpAddr::V6(v6),
            crate::addr::HostLiteral::Name(name) => {
                let resolved = deadline
                    .run(async {
                        self.resolver.resolve(Name::new(name), FamilyHint::Unspecified).await
                    })
                    .await?;
                resolved.addr()
            }
        };
        Ok(SocketAddr::new(ip, proxy.port()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::GaiResolver;
    use crate::url::ProxyDescriptor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_socks4_end_to_end_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 9];
            sock.read_exact(&mut req).await.unwrap();
            sock.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let descriptor = ProxyDescriptor::parse(&format!("socks4://{proxy_addr}")).unwrap();
        let engine = ProxyEngine::new(GaiResolver::new());
        let target = Endpoint::new("93.184.216.34", 80);

        let stream = engine
            .dial(&descriptor, &target, None, &Deadline::none())
            .await
            .unwrap();
        drop(stream);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closes_socket_on_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 9];
            sock.read_exact(&mut req).await.unwrap();
            sock.write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0]).await.unwrap();
            let mut buf = [0u8; 1];
            let n = sock.read(&mut buf).await.unwrap_or(0);
            assert_eq!(n, 0, "engine must close its socket on handshake failure");
        });

        let descriptor = ProxyDescriptor::parse(&format!("socks4://{proxy_addr}")).unwrap();
        let engine = ProxyEngine::new(GaiResolver::new());
        let target = Endpoint::new("93.184.216.34", 80);

        let out = engine.dial(&descriptor, &target, None, &Deadline::none()).await;
        assert!(out.is_err());
        server.await.unwrap();
    }
}
