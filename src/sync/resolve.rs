//! The blocking counterpart of [`crate::resolve::Resolve`].

use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::error::Error;
use crate::resolve::FamilyHint;

/// A resolved address, blocking-path counterpart to [`crate::resolve::ResolvedAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResolvedAddress(IpAddr);

impl SyncResolvedAddress {
    /// Wraps an already-resolved [`IpAddr`].
    pub fn new(addr: IpAddr) -> Self {
        Self(addr)
    }

    /// The resolved address.
    pub fn addr(&self) -> IpAddr {
        self.0
    }

    /// `true` if this is a v4 address.
    pub fn is_v4(&self) -> bool {
        self.0.is_ipv4()
    }

    /// The raw network-order address bytes: 4 bytes for v4, 16 for v6.
    pub fn octets(&self) -> Vec<u8> {
        match self.0 {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        }
    }
}

/// Blocking name resolution capability, the blocking counterpart of [`crate::resolve::Resolve`].
///
/// `resolve` runs on the calling thread and blocks it; callers that dial many proxies
/// concurrently should do so from a thread pool rather than expecting this trait to yield.
pub trait SyncResolve: Send + Sync {
    /// Resolves `name`, returning an address that satisfies `hint`.
    ///
    /// When `hint` is [`FamilyHint::V4Only`] and `name` has no v4 address, implementations should
    /// distinguish why: [`Error::UnsupportedAddress`] if the name resolved to v6 addresses only,
    /// [`Error::DnsFailure`] if it didn't resolve at all. Callers such as SOCKS4's local-resolve
    /// path rely on this distinction to report the right error.
    fn resolve(&self, name: &str, hint: FamilyHint) -> Result<SyncResolvedAddress, Error>;
}

/// The default blocking resolver: delegates to the platform's blocking `getaddrinfo` via
/// [`std::net::ToSocketAddrs`].
#[derive(Clone, Copy, Default)]
pub struct StdResolver(());

impl StdResolver {
    /// Builds the default resolver.
    pub fn new() -> Self {
        Self(())
    }
}

impl fmt::Debug for StdResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdResolver").finish()
    }
}

impl SyncResolve for StdResolver {
    fn resolve(&self, name: &str, hint: FamilyHint) -> Result<SyncResolvedAddress, Error> {
        let addrs: Vec<SocketAddr> = (name, 0u16)
            .to_socket_addrs()
            .map_err(|_| Error::DnsFailure)?
            .collect();

        match hint {
            FamilyHint::Unspecified => addrs
                .into_iter()
                .next()
                .map(|a| SyncResolvedAddress::new(a.ip()))
                .ok_or(Error::DnsFailure),
            FamilyHint::V4Only => match addrs.iter().find(|a| a.is_ipv4()) {
                Some(a) => Ok(SyncResolvedAddress::new(a.ip())),
                None if !addrs.is_empty() => Err(Error::UnsupportedAddress(format!(
                    "{name} resolved only to IPv6 addresses, which SOCKS4 cannot carry"
                ))),
                None => Err(Error::DnsFailure),
            },
        }
    }
}
