//! The blocking counterpart of [`crate::socks5`]'s SOCKS5 handshake.

use crate::addr::{classify, idna_encode, pack_port, HostLiteral, MAX_DOMAIN_LEN};
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{Error, Socks5ReplyCode};
use crate::resolve::FamilyHint;
use crate::sync::resolve::SyncResolve;
use crate::sync::stream::{read_exact, write_all, SyncStream};
use crate::url::Endpoint;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERPASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_VERSION: u8 = 0x01;
const ATYP_V4: u8 = 0x01;
const ATYP_NAME: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// Runs the three-phase SOCKS5 handshake over an already-connected `stream`. See
/// [`crate::socks5::handshake`] for the wire format.
pub(crate) fn handshake<S: SyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    rdns: bool,
    resolver: &dyn SyncResolve,
    deadline: &Deadline,
) -> Result<(), Error> {
    let selected_userpass = negotiate_method(stream, credentials, deadline)?;

    if selected_userpass {
        let creds = credentials.expect("server can only select USERPASS when credentials were offered");
        authenticate(stream, creds, deadline)?;
    }

    connect(stream, destination, rdns, resolver, deadline)
}

/// Sends the method negotiation request and returns `true` if the server selected
/// `METHOD_USERPASS`, `false` if it selected `METHOD_NO_AUTH` — the caller must only run Phase 2
/// when this is `true`, regardless of what methods were offered.
fn negotiate_method<S: SyncStream + ?Sized>(
    stream: &mut S,
    credentials: Option<&Credentials>,
    deadline: &Deadline,
) -> Result<bool, Error> {
    let methods: &[u8] = if credentials.is_some() {
        &[METHOD_USERPASS, METHOD_NO_AUTH]
    } else {
        &[METHOD_NO_AUTH]
    };

    let mut req = Vec::with_capacity(2 + methods.len());
    req.push(VERSION);
    req.push(methods.len() as u8);
    req.extend_from_slice(methods);
    write_all(stream, &req, deadline)?;

    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, deadline)?;
    if reply[0] != VERSION {
        return Err(Error::InvalidReply(format!(
            "expected SOCKS version 0x05 in method reply, got {:#04x}",
            reply[0]
        )));
    }

    match reply[1] {
        METHOD_NO_ACCEPTABLE => Err(Error::NoAcceptableAuthMethods),
        METHOD_NO_AUTH => Ok(false),
        METHOD_USERPASS if credentials.is_some() => Ok(true),
        other => Err(Error::InvalidReply(format!(
            "server selected unrequested auth method {other:#04x}"
        ))),
    }
}

fn authenticate<S: SyncStream + ?Sized>(
    stream: &mut S,
    credentials: &Credentials,
    deadline: &Deadline,
) -> Result<(), Error> {
    let username = credentials.username();
    let password = credentials.password();
    if username.len() > MAX_DOMAIN_LEN || password.len() > MAX_DOMAIN_LEN {
        return Err(Error::InvalidCredentials(
            "username/password must each be at most 255 bytes for RFC 1929 auth".into(),
        ));
    }

    let mut req = Vec::with_capacity(3 + username.len() + password.len());
    req.push(AUTH_VERSION);
    req.push(username.len() as u8);
    req.extend_from_slice(username);
    req.push(password.len() as u8);
    req.extend_from_slice(password);
    write_all(stream, &req, deadline)?;

    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, deadline)?;
    if reply[0] != AUTH_VERSION || reply[1] != 0x00 {
        return Err(Error::AuthFailed);
    }
    Ok(())
}

fn connect<S: SyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    rdns: bool,
    resolver: &dyn SyncResolve,
    deadline: &Deadline,
) -> Result<(), Error> {
    let mut req = vec![VERSION, 0x01, 0x00];
    encode_destination(&mut req, destination, rdns, resolver)?;
    req.extend_from_slice(&pack_port(destination.port()));
    write_all(stream, &req, deadline)?;

    let mut head = [0u8; 4];
    read_exact(stream, &mut head, deadline)?;
    if head[0] != VERSION {
        return Err(Error::InvalidReply(format!(
            "expected SOCKS version 0x05 in connect reply, got {:#04x}",
            head[0]
        )));
    }
    if head[2] != 0x00 {
        return Err(Error::InvalidReply(format!(
            "expected reserved byte 0x00, got {:#04x}",
            head[2]
        )));
    }

    let rep = head[1];
    let atyp = head[3];

    consume_bind_address(stream, atyp, deadline)?;

    if rep != 0x00 {
        return Err(Error::ProxyError(crate::error::ProxyErrorCode::Socks5(
            Socks5ReplyCode::from_byte(rep),
        )));
    }

    Ok(())
}

fn encode_destination(
    req: &mut Vec<u8>,
    destination: &Endpoint,
    rdns: bool,
    resolver: &dyn SyncResolve,
) -> Result<(), Error> {
    match classify(destination.host()) {
        HostLiteral::V4(v4) => {
            req.push(ATYP_V4);
            req.extend_from_slice(&v4.octets());
        }
        HostLiteral::V6(v6) => {
            req.push(ATYP_V6);
            req.extend_from_slice(&v6.octets());
        }
        HostLiteral::Name(name) if rdns => {
            let encoded = idna_encode(&name)?;
            req.push(ATYP_NAME);
            req.push(encoded.len() as u8);
            req.extend_from_slice(&encoded);
        }
        HostLiteral::Name(name) => {
            let resolved = resolver.resolve(&name, FamilyHint::Unspecified)?;
            if resolved.is_v4() {
                req.push(ATYP_V4);
            } else {
                req.push(ATYP_V6);
            }
            req.extend_from_slice(&resolved.octets());
        }
    }
    Ok(())
}

fn consume_bind_address<S: SyncStream + ?Sized>(
    stream: &mut S,
    atyp: u8,
    deadline: &Deadline,
) -> Result<(), Error> {
    let addr_len = match atyp {
        ATYP_V4 => 4,
        ATYP_V6 => 16,
        ATYP_NAME => {
            let mut len_byte = [0u8; 1];
            read_exact(stream, &mut len_byte, deadline)?;
            len_byte[0] as usize
        }
        other => {
            return Err(Error::InvalidReply(format!(
                "unknown bind address type {other:#04x}"
            )))
        }
    };
    let mut bind = vec![0u8; addr_len + 2];
    read_exact(stream, &mut bind, deadline)?;
    Ok(())
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

    #[test]
    fn handshake_without_credentials_uses_no_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut method_req = [0u8; 3];
            sock.read_exact(&mut method_req).unwrap();
            assert_eq!(method_req, [0x05, 0x01, 0x00]);
            sock.write_all(&[0x05, 0x00]).unwrap();

            let mut connect_req = [0u8; 10];
            sock.read_exact(&mut connect_req).unwrap();
            assert_eq!(&connect_req[..4], &[0x05, 0x01, 0x00, 0x01]);

            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("93.184.216.34", 443);
        handshake(&mut client, &dest, None, false, &StubResolver, &Deadline::none()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn server_selecting_no_auth_skips_phase_2_even_with_credentials_offered() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut method_req = [0u8; 4];
            sock.read_exact(&mut method_req).unwrap();
            assert_eq!(method_req, [0x05, 0x02, 0x02, 0x00]);
            sock.write_all(&[0x05, 0x00]).unwrap();

            // The server selected NO_AUTH, so the very next bytes must be the CONNECT request,
            // not an RFC 1929 sub-negotiation.
            let mut connect_req = [0u8; 10];
            sock.read_exact(&mut connect_req).unwrap();
            assert_eq!(&connect_req[..4], &[0x05, 0x01, 0x00, 0x01]);

            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("93.184.216.34", 443);
        let creds = Credentials::new("alice", "hunter2");
        handshake(&mut client, &dest, Some(&creds), false, &StubResolver, &Deadline::none()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn handshake_with_credentials_authenticates() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut method_req = [0u8; 4];
            sock.read_exact(&mut method_req).unwrap();
            assert_eq!(method_req, [0x05, 0x02, 0x02, 0x00]);
            sock.write_all(&[0x05, 0x02]).unwrap();

            let mut auth = [0u8; 2 + 5 + 1 + 7];
            sock.read_exact(&mut auth).unwrap();
            sock.write_all(&[0x01, 0x00]).unwrap();

            let mut connect_head = [0u8; 4];
            sock.read_exact(&mut connect_head).unwrap();
            assert_eq!(connect_head[3], ATYP_NAME);
            let mut len_byte = [0u8; 1];
            sock.read_exact(&mut len_byte).unwrap();
            let mut name = vec![0u8; len_byte[0] as usize];
            sock.read_exact(&mut name).unwrap();
            assert_eq!(name, b"example.com");
            let mut port = [0u8; 2];
            sock.read_exact(&mut port).unwrap();

            sock.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("example.com", 443);
        let creds = Credentials::new("alice", "hunter2");
        handshake(&mut client, &dest, Some(&creds), true, &StubResolver, &Deadline::none()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn no_acceptable_methods_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = [0u8; 3];
            sock.read_exact(&mut req).unwrap();
            sock.write_all(&[0x05, 0xFF]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("93.184.216.34", 443);
        let out = handshake(&mut client, &dest, None, false, &StubResolver, &Deadline::none());
        assert!(matches!(out, Err(Error::NoAcceptableAuthMethods)));
        server.join().unwrap();
    }

    #[test]
    fn non_zero_rep_is_mapped_to_proxy_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut req = [0u8; 3];
            sock.read_exact(&mut req).unwrap();
            sock.write_all(&[0x05, 0x00]).unwrap();
            let mut connect_req = [0u8; 10];
            sock.read_exact(&mut connect_req).unwrap();
            sock.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let dest = Endpoint::new("93.184.216.34", 443);
        let out = handshake(&mut client, &dest, None, false, &StubResolver, &Deadline::none());
        assert!(matches!(
            out,
            Err(Error::ProxyError(crate::error::ProxyErrorCode::Socks5(
                Socks5ReplyCode::ConnectionRefused
            )))
        ));
        server.join().unwrap();
    }
}
