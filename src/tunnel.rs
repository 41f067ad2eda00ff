//! The HTTP CONNECT client handshake (RFC 7231 §4.3.6).

use base64::Engine;

use crate::addr::{classify, HostLiteral};
use crate::credentials::Credentials;
use crate::deadline::Deadline;
use crate::error::{Error, ProxyErrorCode};
use crate::stream::{read_until_delimiter, write_all, AsyncStream};
use crate::url::Endpoint;

const USER_AGENT: &str = concat!("tunnelkit/", env!("CARGO_PKG_VERSION"));
const MAX_REPLY_LEN: usize = 16 * 1024;

/// Sends a `CONNECT` request for `destination` and reads the proxy's response, leaving the
/// stream positioned immediately after the header block on success.
pub(crate) async fn handshake<S: AsyncStream + ?Sized>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: Option<&Credentials>,
    deadline: &Deadline,
) -> Result<(), Error> {
    let request = build_request(destination, credentials);
    write_all(stream, &request, deadline).await?;

    let reply = read_until_delimiter(stream, b"\r\n\r\n", MAX_REPLY_LEN, deadline).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn handshake_succeeds_on_200() {
        let (mut client, mut server) = duplex(1024);
        let dest = Endpoint::new("example.com", 443);
        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = server.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if buf.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            let req = String::from_utf8(buf).unwrap();
            assert!(req.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
            assert!(req.contains("Host: example.com:443\r\n"));
            server
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
        });

        handshake(&mut client, &dest, None, &Deadline::none()).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_sends_basic_auth_when_credentials_present() {
        let (mut client, mut server) = duplex(1024);
        let dest = Endpoint::new("example.com", 443);
        let creds = Credentials::new("alice", "hunter2");
        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = server.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if buf.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            let req = String::from_utf8(buf).unwrap();
            let expected = base64::engine::general_purpose::STANDARD.encode("alice:hunter2");
            assert!(req.contains(&format!("Proxy-Authorization: Basic {expected}\r\n")));
            server.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        });

        handshake(&mut client, &dest, Some(&creds), &Deadline::none()).await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_maps_407_to_auth_failed() {
        let (mut client, mut server) = duplex(1024);
        let dest = Endpoint::new("example.com", 443);
        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let n = server.read(&mut buf).await.unwrap();
                if buf[..n].ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let out = handshake(&mut client, &dest, None, &Deadline::none()).await;
        assert!(matches!(out, Err(Error::AuthFailed)));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_maps_other_status_to_proxy_error() {
        let (mut client, mut server) = duplex(1024);
        let dest = Endpoint::new("example.com", 443);
        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let n = server.read(&mut buf).await.unwrap();
                if buf[..n].ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            server.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await.unwrap();
        });

        let out = handshake(&mut client, &dest, None, &Deadline::none()).await;
        assert!(matches!(
            out,
            Err(Error::ProxyError(ProxyErrorCode::Http(502)))
        ));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn bracketed_ipv6_host_token_is_used_in_request_line() {
        let (mut client, mut server) = duplex(1024);
        let dest = Endpoint::new("::1", 443);
        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = server.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if buf.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            let req = String::from_utf8(buf).unwrap();
            assert!(req.starts_with("CONNECT [::1]:443 HTTP/1.1\r\n"));
            server.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        });

        handshake(&mut client, &dest, None, &Deadline::none()).await.unwrap();
        server_task.await.unwrap();
    }
}
