//! The SOCKS4 / SOCKS4a client handshake.
//!
//! Wire format: `VN(1)=0x04 | CD(1)=0x01 | DSTPORT(2) | DSTIP(4) | USERID(..) | 0x00 |
//! [DSTNAME(..) | 0x00]`, reply `VN(1)=0x00 | CD(1) | DSTPORT(2) | DSTIP(4)`.

use crate::addr::{classify, idna_encode, pack_port, HostLiteral};
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{Error, Socks4RejectReason};
use crate::resolve::{FamilyHint, Name, Resolve};
use crate::stream::{read_exact, write_all, AsyncStream};
use crate::url::Endpoint;

const VERSION: u8 = 0x04;
const COMMAND_CONNECT: u8 = 0x01;
const SOCKS4A_SENTINEL: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Runs the SOCKS4/SOCKS4a handshake over an already-connected `stream`, leaving it positioned
/// immediately after the reply on success.
pub(crate) async fn handshake<S: AsyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    rdns: bool,
    resolver: &dyn Resolve,
    deadline: &Deadline,
) -> Result<(), Error> {
    let request = build_request(destination, credentials, rdns, resolver, deadline).await?;
    write_all(stream, &request, deadline).await?;

    let mut reply = [0u8; 8];
    read_exact(stream, &mut reply, deadline).await?;

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

async fn build_request(
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    rdns: bool,
    resolver: &dyn Resolve,
    deadline: &Deadline,
) -> Result<Vec<u8>, Error> {
    let mut req = Vec::with_capacity(16);
    req.push(VERSION);
    req.push(COMMAND_CONNECT);
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
            let resolved = deadline
                .run(async { resolver.resolve(Name::new(name.clone()), FamilyHint::V4Only).await })
                .await?;
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
