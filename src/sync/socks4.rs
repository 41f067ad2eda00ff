//! The blocking counterpart of [`crate::socks4`]'s SOCKS4 / SOCKS4a handshake.

use crate::addr::{classify, idna_encode, pack_port, HostLiteral};
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{Error, Socks4RejectReason};
use crate::resolve::FamilyHint;
use crate::sync::resolve::SyncResolve;
use crate::sync::stream::{read_exact, write_all, SyncStream};
use crate::url::Endpoint;

const SOCKS4A_SENTINEL: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Runs the SOCKS4/SOCKS4a handshake over an already-connected `stream`, leaving it positioned
/// immediately after the reply on success. See [`crate::socks4::handshake`] for the wire format.
pub(crate) fn handshake<S: SyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    rdns: bool,
    resolver: &dyn SyncResolve,
    deadline: &Deadline,
) -> Result<(), Error> {
    let request = build_request(destination, credentials, rdns, resolver)?;
    write_all(stream, &request, deadline)?;

    let mut reply = [0u8; 8];
    read_exact(stream, &mut reply, deadline)?;

    if reply[0] != 0x00 {
        return Err(Error::InvalidReply(format!(
            "expected null version byte 0x00, got {:#04x}",
            reply[0]
        )));
    }

    match reply[1] {
        0x5A => Ok(()),
        other => Err(Error::RequestRejected(Socks4RejectReason::from_byte(other))),
    }
}

fn build_request(
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    rdns: bool,
    resolver: &dyn SyncResolve,
) -> Result<Vec<u8>, Error> {
    let mut req = Vec::with_capacity(16);
    req.push(0x04);
    req.push(0x01);
    req.extend_from_slice(&pack_port(destination.port()));

    let hostname_trailer = match classify(destination.host()) {
        HostLiteral::V4(v4) => {
            req.extend_from_slice(&v4.octets());
            None
        }
        HostLiteral::V6(_) => {
            return Err(Error::UnsupportedAddress(
                "SOCKS4/4a cannot carry an IPv6 destination".into(),
            ))
        }
        HostLiteral::Name(name) if rdns => {
            req.extend_from_slice(&SOCKS4A_SENTINEL);
            Some(idna_encode(&name)?)
        }
        HostLiteral::Name(name) => {
            let resolved = resolver.resolve(&name, FamilyHint::V4Only)?;
            if !resolved.is_v4() {
                return Err(Error::UnsupportedAddress(format!(
                    "resolver returned a non-IPv4 address for {name:?} under SOCKS4"
                )));
            }
            req.extend_from_slice(&resolved.octets());
            None
        }
    };

    match credentials.map(|c| c.username()) {
        Some(user) if !user.is_empty() => req.extend_from_slice(user),
        _ => {}
    }
    req.push(0x00);

    if let Some(hostname) = hostname_trailer {
        req.extend_from_slice(&hostname);
        req.push(0x00);
    }

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::resolve::SyncResolvedAddress;
    use std::io::{Read, Write};
    use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};

    struct StubResolver;

    impl SyncResolve for StubResolver {
        fn resolve(&self, _name: &str, _hint: FamilyHint) -> Result<SyncResolvedAddress, Error> {
            Ok(SyncResolvedAddress::new(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))))
        }
    }

    /// A resolver that only has a v6 address for the name it's asked about, used to exercise the
    /// family check in `build_request` independently of what the default resolver does with a
    /// `V4Only` hint.
    struct V6OnlyResolver;

    impl SyncResolve for V6OnlyResolver {
        fn resolve(&self, _name: &str, _hint: FamilyHint) -> Result<SyncResolvedAddress, Error> {
            Ok(SyncResolvedAddress::new(IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)))
        }
    }

    #[test]
    fn handshake_rejects_name_that_resolves_only_to_v6() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = std::thread::spawn(move || listener.accept().unwrap());
        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("example.com", 80);
        let out = handshake(&mut client, &dest, None, false, &V6OnlyResolver, &Deadline::none());
        assert!(matches!(out, Err(Error::UnsupportedAddress(_))));
    }

    #[test]
    fn handshake_succeeds_for_ipv4_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = [0u8; 9];
            sock.read_exact(&mut req).unwrap();
            assert_eq!(req[0], 0x04);
            assert_eq!(&req[4..8], &[93, 184, 216, 34]);
            sock.write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("93.184.216.34", 80);
        handshake(&mut client, &dest, None, false, &StubResolver, &Deadline::none()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn handshake_rejects_ipv6_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = std::thread::spawn(move || listener.accept().unwrap());
        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("::1", 80);
        let out = handshake(&mut client, &dest, None, false, &StubResolver, &Deadline::none());
        assert!(matches!(out, Err(Error::UnsupportedAddress(_))));
    }

    #[test]
    fn handshake_surfaces_rejection_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = [0u8; 9];
            sock.read_exact(&mut req).unwrap();
            sock.write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("93.184.216.34", 80);
        let out = handshake(&mut client, &dest, None, false, &StubResolver, &Deadline::none());
        assert!(matches!(out, Err(Error::RequestRejected(Socks4RejectReason::Failed))));
        server.join().unwrap();
    }
}
