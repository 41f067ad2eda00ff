//! The injectable DNS resolution capability used for local-DNS dial paths.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;

/// A domain name to resolve into an address.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name(Box<str>);

impl Name {
    /// Builds a `Name` from any string-like value.
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self(host.into())
    }

    /// Borrows the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The address family a resolution must satisfy, per §4.3's local-resolve policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyHint {
    /// Either family is acceptable (the SOCKS5 local-resolve path).
    Unspecified,
    /// Only an IPv4 result is acceptable (the SOCKS4 local-resolve path, since SOCKS4 cannot
    /// carry an IPv6 address).
    V4Only,
}

/// A resolved address and the family it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    addr: IpAddr,
}

impl ResolvedAddress {
    /// Wraps an already-resolved [`IpAddr`].
    pub fn new(addr: IpAddr) -> Self {
        Self { addr }
    }

    /// The resolved address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// `true` if this is a v4 address.
    pub fn is_v4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// The raw network-order address bytes: 4 bytes for v4, 16 for v6.
    pub fn octets(&self) -> Vec<u8> {
        match self.addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }
}

/// Future type returned by [`Resolve::resolve`].
pub type Resolving = Pin<Box<dyn Future<Output = Result<ResolvedAddress, Error>> + Send>>;

/// An injectable DNS resolution capability.
///
/// The default instance, [`GaiResolver`], uses the host's async getaddrinfo via
/// [`tokio::net::lookup_host`]. Tests and callers that need deterministic or offline behavior
/// supply their own implementation.
pub trait Resolve: Send + Sync {
    /// Resolves `name`, returning an address that satisfies `hint`.
    ///
    /// When `hint` is [`FamilyHint::V4Only`] and `name` has no v4 address, implementations should
    /// distinguish why: [`Error::UnsupportedAddress`] if the name resolved to v6 addresses only,
    /// [`Error::DnsFailure`] if it didn't resolve at all. Callers such as SOCKS4's local-resolve
    /// path rely on this distinction to report the right error.
    fn resolve(&self, name: Name, hint: FamilyHint) -> Resolving;
}

impl<T: Resolve + ?Sized> Resolve for Arc<T> {
    fn resolve(&self, name: Name, hint: FamilyHint) -> Resolving {
        (**self).resolve(name, hint)
    }
}

/// The default resolver: delegates to the host's async DNS via [`tokio::net::lookup_host`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GaiResolver(());

impl GaiResolver {
    /// Builds the default resolver.
    pub fn new() -> Self {
        Self(())
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name, hint: FamilyHint) -> Resolving {
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name.as_str(), 0))
                .await
                .map_err(|_| Error::DnsFailure)?
                .collect();

            match hint {
                FamilyHint::Unspecified => addrs
                    .into_iter()
                    .next()
                    .map(|a| ResolvedAddress::new(a.ip()))
                    .ok_or(Error::DnsFailure),
                FamilyHint::V4Only => match addrs.iter().find(|a| a.is_ipv4()) {
                    Some(a) => Ok(ResolvedAddress::new(a.ip())),
                    None if !addrs.is_empty() => Err(Error::UnsupportedAddress(format!(
                        "{name} resolved only to IPv6 addresses, which SOCKS4 cannot carry"
                    ))),
                    None => Err(Error::DnsFailure),
                },
            }
        })
    }
}

/// A resolver that always fails, never performing network I/O.
///
/// Grounded in the source's dynamic "NoResolver": when a destination name must be forwarded
/// verbatim to the proxy (the rdns path, or HTTP CONNECT, which is always remote-resolved), the
/// [`ProxyEngine`](crate::ProxyEngine) never invokes its resolver for the destination at all.
/// `NullResolver` exists so call sites that are structurally required to hold *some* `Resolve`
/// value (for example a façade wrapping a generic inner connector) can plug in a capability that
/// is guaranteed to never touch the network, instead of silently doing a real lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver(());

impl NullResolver {
    /// Builds the resolver.
    pub fn new() -> Self {
        Self(())
    }
}

impl Resolve for NullResolver {
    fn resolve(&self, name: Name, _hint: FamilyHint) -> Resolving {
        Box::pin(async move {
            log::warn!("NullResolver invoked for {name:?}; this should be unreachable under rdns");
            Err(Error::DnsFailure)
        })
    }
}
