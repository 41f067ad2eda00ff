use std::fmt;
use std::io;

/// The reason a SOCKS4 `CD` reply byte other than `0x5A` was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks4RejectReason {
    /// `0x5B` — request rejected or failed.
    Failed,
    /// `0x5C` — request rejected, the SOCKS server could not connect to identd.
    IdentdUnreachable,
    /// `0x5D` — request rejected, client and identd report different user ids.
    IdentMismatch,
    /// Any other non-success byte. The raw value is preserved.
    Unknown(u8),
}

impl fmt::Display for Socks4RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => f.write_str("request rejected or failed"),
            Self::IdentdUnreachable => {
                f.write_str("request rejected, SOCKS server cannot connect to identd")
            }
            Self::IdentMismatch => {
                f.write_str("request rejected, client and identd report different user ids")
            }
            Self::Unknown(code) => write!(f, "unknown rejection code {code:#04x}"),
        }
    }
}

impl Socks4RejectReason {
    pub(crate) fn from_byte(b: u8) -> Self {
        match b {
            0x5B => Self::Failed,
            0x5C => Self::IdentdUnreachable,
            0x5D => Self::IdentMismatch,
            other => Self::Unknown(other),
        }
    }
}

/// The `REP` byte of a non-success SOCKS5 reply (RFC 1928 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5ReplyCode {
    /// `0x01` general SOCKS server failure.
    GeneralFailure,
    /// `0x02` connection not allowed by ruleset.
    NotAllowed,
    /// `0x03` network unreachable.
    NetworkUnreachable,
    /// `0x04` host unreachable.
    HostUnreachable,
    /// `0x05` connection refused.
    ConnectionRefused,
    /// `0x06` TTL expired.
    TtlExpired,
    /// `0x07` command not supported.
    CommandNotSupported,
    /// `0x08` address type not supported.
    AddressTypeNotSupported,
    /// Any other non-zero byte. The raw value is preserved.
    Unknown(u8),
}

impl fmt::Display for Socks5ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::GeneralFailure => "general SOCKS server failure",
            Self::NotAllowed => "connection not allowed by ruleset",
            Self::NetworkUnreachable => "network unreachable",
            Self::HostUnreachable => "host unreachable",
            Self::ConnectionRefused => "connection refused",
            Self::TtlExpired => "TTL expired",
            Self::CommandNotSupported => "command not supported, or protocol error",
            Self::AddressTypeNotSupported => "address type not supported",
            Self::Unknown(code) => return write!(f, "unknown reply code {code:#04x}"),
        };
        f.write_str(msg)
    }
}

impl Socks5ReplyCode {
    pub(crate) fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::GeneralFailure,
            0x02 => Self::NotAllowed,
            0x03 => Self::NetworkUnreachable,
            0x04 => Self::HostUnreachable,
            0x05 => Self::ConnectionRefused,
            0x06 => Self::TtlExpired,
            0x07 => Self::CommandNotSupported,
            0x08 => Self::AddressTypeNotSupported,
            other => Self::Unknown(other),
        }
    }
}

/// Everything that can go wrong dialing a destination through a proxy or chain of proxies.
#[derive(Debug)]
pub enum Error {
    /// The proxy URL could not be parsed.
    InvalidUrl(String),
    /// An address could not be encoded for the wire (IDNA overflow, unsupported family).
    InvalidAddress(String),
    /// A username or password exceeded the protocol's length limit.
    InvalidCredentials(String),
    /// The TCP dial to the proxy itself failed.
    ProxyConnectError(io::Error),
    /// The deadline passed before the dial or handshake completed.
    Timeout,
    /// The proxy's reply was malformed: wrong version byte, wrong reserved byte, truncated
    /// response, or an unparseable HTTP status line.
    InvalidReply(String),
    /// SOCKS5 method negotiation returned `0xFF`.
    NoAcceptableAuthMethods,
    /// SOCKS5 username/password subnegotiation was rejected, or an HTTP CONNECT got `407`.
    AuthFailed,
    /// SOCKS4 returned `0x5B`/`0x5C`/`0x5D`.
    RequestRejected(Socks4RejectReason),
    /// A destination or resolved address can't be carried by the chosen protocol (an IPv6
    /// literal under SOCKS4, or a resolver returning no address of the required family).
    UnsupportedAddress(String),
    /// SOCKS5 `REP` was non-zero, or HTTP CONNECT returned a non-200, non-407 status.
    ProxyError(ProxyErrorCode),
    /// The peer closed the connection before a full message was read.
    UnexpectedEof,
    /// DNS resolution failed or did not produce an address of the required family.
    DnsFailure,
    /// The underlying transport returned an I/O error outside the cases above.
    Io(io::Error),
}

/// The code carried by [`Error::ProxyError`] — either a SOCKS5 `REP` byte or an HTTP status.
#[derive(Debug, Clone, Copy)]
pub enum ProxyErrorCode {
    /// SOCKS5 `REP` byte, decoded.
    Socks5(Socks5ReplyCode),
    /// HTTP CONNECT status code.
    Http(u16),
}

impl fmt::Display for ProxyErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socks5(code) => code.fmt(f),
            Self::Http(status) => write!(f, "HTTP CONNECT failed with status {status}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(reason) => write!(f, "invalid proxy url: {reason}"),
            Self::InvalidAddress(reason) => write!(f, "invalid address: {reason}"),
            Self::InvalidCredentials(reason) => write!(f, "invalid credentials: {reason}"),
            Self::ProxyConnectError(e) => write!(f, "failed to connect to proxy: {e}"),
            Self::Timeout => f.write_str("proxy handshake timed out"),
            Self::InvalidReply(reason) => write!(f, "invalid reply from proxy: {reason}"),
            Self::NoAcceptableAuthMethods => {
                f.write_str("proxy offered no acceptable authentication method")
            }
            Self::AuthFailed => f.write_str("proxy authentication failed"),
            Self::RequestRejected(reason) => write!(f, "proxy rejected request: {reason}"),
            Self::UnsupportedAddress(reason) => write!(f, "unsupported address: {reason}"),
            Self::ProxyError(code) => write!(f, "proxy error: {code}"),
            Self::UnexpectedEof => f.write_str("proxy closed the connection unexpectedly"),
            Self::DnsFailure => f.write_str("could not resolve to an acceptable address type"),
            Self::Io(e) => write!(f, "io error during proxy handshake: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ProxyConnectError(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(err)
        }
    }
}
