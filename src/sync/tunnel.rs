//! The blocking counterpart of [`crate::tunnel`]'s HTTP CONNECT handshake.

use base64::Engine;

use crate::addr::{classify, HostLiteral};
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{Error, ProxyErrorCode};
use crate::sync::stream::{read_until_delimiter, write_all, SyncStream};
use crate::url::Endpoint;

const USER_AGENT: &str = concat!("tunnelkit/", env!("CARGO_PKG_VERSION"));
const MAX_REPLY_LEN: usize = 16 * 1024;

/// Sends a `CONNECT` request for `destination` and reads the proxy's response. See
/// [`crate::tunnel::handshake`] for the wire format.
pub(crate) fn handshake<S: SyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    deadline: &Deadline,
) -> Result<(), Error> {
    let request = build_request(destination, credentials);
    write_all(stream, &request, deadline)?;

    let reply = read_until_delimiter(stream, b"\r\n\r\n", MAX_REPLY_LEN, deadline)?;
    let status = parse_status(&reply)?;

    match status {
        200 => Ok(()),
        407 => Err(Error::AuthFailed),
        other => Err(Error::ProxyError(ProxyErrorCode::Http(other))),
    }
}

fn build_request(destination: &Endpoint, credentials: Option<&Credentials>) -> Vec<u8> {
    let host = host_token(destination.host());
    let port = destination.port();

    let mut req = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         User-Agent: {USER_AGENT}\r\n"
    )
    .into_bytes();

    if let Some(creds) = credentials {
        if !creds.username().is_empty() && !creds.password().is_empty() {
            let mut userpass = Vec::with_capacity(creds.username().len() + creds.password().len() + 1);
            userpass.extend_from_slice(creds.username());
            userpass.push(b':');
            userpass.extend_from_slice(creds.password());
            let encoded = base64::engine::general_purpose::STANDARD.encode(userpass);
            req.extend_from_slice(b"Proxy-Authorization: Basic ");
            req.extend_from_slice(encoded.as_bytes());
            req.extend_from_slice(b"\r\n");
        }
    }

    req.extend_from_slice(b"\r\n");
    req
}

fn host_token(host: &str) -> String {
    match classify(host) {
        HostLiteral::V6(v6) => format!("[{v6}]"),
        HostLiteral::V4(v4) => v4.to_string(),
        HostLiteral::Name(name) => name,
    }
}

fn parse_status(reply: &[u8]) -> Result<u16, Error> {
    let text = std::str::from_utf8(reply)
        .map_err(|_| Error::InvalidReply("CONNECT response header was not valid UTF-8".into()))?;
    let first_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| Error::InvalidReply("empty CONNECT response".into()))?;

    let mut parts = first_line.split_whitespace();
    let _version = parts
        .next()
        .ok_or_else(|| Error::InvalidReply(format!("unparseable status line {first_line:?}")))?;
    let status = parts
        .next()
        .ok_or_else(|| Error::InvalidReply(format!("unparseable status line {first_line:?}")))?;
    status
        .parse::<u16>()
        .map_err(|_| Error::InvalidReply(format!("non-numeric status {status:?}")))
}
