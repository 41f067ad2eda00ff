//! The SOCKS5 client handshake (RFC 1928), with RFC 1929 username/password subnegotiation.

use crate::addr::{classify, idna_encode, pack_port, HostLiteral, MAX_DOMAIN_LEN};
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{Error, Socks5ReplyCode};
use crate::resolve::{FamilyHint, Name, Resolve};
use crate::stream::{read_exact, write_all, AsyncStream};
use crate::url::Endpoint;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERPASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_VERSION: u8 = 0x01;
const COMMAND_CONNECT: u8 = 0x01;
const RESERVED: u8 = 0x00;
const ATYP_V4: u8 = 0x01;
const ATYP_NAME: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// Runs the three-phase SOCKS5 handshake over an already-connected `stream`, leaving it
/// positioned immediately after the connect reply on success.
pub(crate) async fn handshake<S: AsyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    rdns: bool,
    resolver: &dyn Resolve,
    deadline: &Deadline,
) -> Result<(), Error> {
    let selected_userpass = negotiate_method(stream, credentials, deadline).await?;

    if selected_userpass {
        let creds = credentials.expect("server can only select USERPASS when credentials were offered");
        authenticate(stream, creds, deadline).await?;
    }

    connect(stream, destination, rdns, resolver, deadline).await
}

/// Sends the method negotiation request and returns `true` if the server selected
/// `METHOD_USERPASS`, `false` if it selected `METHOD_NO_AUTH` — the caller must only run Phase 2
/// when this is `true`, regardless of what methods were offered.
async fn negotiate_method<S: AsyncStream + ?Sized>(
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
    write_all(stream, &req, deadline).await?;

    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, deadline).await?;
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

async fn authenticate<S: AsyncStream + ?Sized>(
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
    write_all(stream, &req, deadline).await?;

    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, deadline).await?;
    if reply[0] != AUTH_VERSION || reply[1] != 0x00 {
        return Err(Error::AuthFailed);
    }
    Ok(())
}

async fn connect<S: AsyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    rdns: bool,
    resolver: &dyn Resolve,
    deadline: &Deadline,
) -> Result<(), Error> {
    let mut req = vec![VERSION, COMMAND_CONNECT, RESERVED];
    encode_destination(&mut req, destination, rdns, resolver, deadline).await?;
    req.extend_from_slice(&pack_port(destination.port()));
    write_all(stream, &req, deadline).await?;

    let mut head = [0u8; 4];
    read_exact(stream, &mut head, deadline).await?;
    if head[0] != VERSION {
        return Err(Error::InvalidReply(format!(
            "expected SOCKS version 0x05 in connect reply, got {:#04x}",
            head[0]
        )));
    }
    if head[2] != RESERVED {
        return Err(Error::InvalidReply(format!(
            "expected reserved byte 0x00, got {:#04x}",
            head[2]
        )));
    }

    let rep = head[1];
    let atyp = head[3];

    consume_bind_address(stream, atyp, deadline).await?;

    if rep != 0x00 {
        return Err(Error::ProxyError(crate::error::ProxyErrorCode::Socks5(
            Socks5ReplyCode::from_byte(rep),
        )));
    }

    Ok(())
}

async fn encode_destination<S: AsyncStream + ?Sized>(
    req: &mut Vec<u8>,
    destination: &Endpoint,
    rdns: bool,
    resolver: &dyn Resolve,
    deadline: &Deadline,
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
            let resolved = deadline
                .run(async { resolver.resolve(Name::new(name), FamilyHint::Unspecified).await })
                .await?;
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

async fn consume_bind_address<S: AsyncStream + ?Sized>(
    stream: &mut S,
    atyp: u8,
    deadline: &Deadline,
) -> Result<(), Error> {
    let addr_len = match atyp {
        ATYP_V4 => 4,
        ATYP_V6 => 16,
        ATYP_NAME => {
            let mut len_byte = [0u8; 1];
            read_exact(stream, &mut len_byte, deadline).await?;
            len_byte[0] as usize
        }
        other => {
            return Err(Error::InvalidReply(format!(
                "unknown bind address type {other:#04x}"
            )))
        }
    };
    let mut bind = vec![0u8; addr_len + 2];
    read_exact(stream, &mut bind, deadline).await?;
    Ok(())
}
