//! Address literal classification, IDNA encoding, and wire packing helpers.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::Error;

/// How a destination or proxy host, as given by the caller, classifies for wire purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostLiteral {
    /// A dotted-quad IPv4 literal.
    V4(Ipv4Addr),
    /// An IPv6 literal, with or without brackets in the original string.
    V6(Ipv6Addr),
    /// Anything that didn't parse as an IP literal; carried as given (lowercased by the URL
    /// parser, untouched elsewhere).
    Name(String),
}

impl fmt::Display for HostLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(v4) => v4.fmt(f),
            Self::V6(v6) => v6.fmt(f),
            Self::Name(name) => name.fmt(f),
        }
    }
}

/// Classifies a host string without performing any DNS resolution.
///
/// Bracketed IPv6 literals (`[::1]`) are unwrapped before parsing.
pub fn classify(host: &str) -> HostLiteral {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(v4) = trimmed.parse::<Ipv4Addr>() {
        return HostLiteral::V4(v4);
    }
    if let Ok(v6) = trimmed.parse::<Ipv6Addr>() {
        return HostLiteral::V6(v6);
    }
    HostLiteral::Name(trimmed.to_owned())
}

/// Maximum length (in bytes) of an IDNA-encoded hostname that SOCKS4a/SOCKS5 domain fields can
/// carry; the SOCKS5 domain length prefix is a single unsigned byte.
pub const MAX_DOMAIN_LEN: usize = 255;

/// Encodes `name` into ASCII-compatible (IDNA / Punycode) bytes suitable for a SOCKS hostname
/// field. Fails with [`Error::InvalidAddress`] if the encoded form exceeds
/// [`MAX_DOMAIN_LEN`] bytes or the name cannot be IDNA-encoded.
pub fn idna_encode(name: &str) -> Result<Vec<u8>, Error> {
    let ascii = idna::domain_to_ascii(name)
        .map_err(|e| Error::InvalidAddress(format!("idna encoding failed for {name:?}: {e}")))?;
    if ascii.len() > MAX_DOMAIN_LEN {
        return Err(Error::InvalidAddress(format!(
            "hostname {name:?} encodes to {} bytes, exceeds the {MAX_DOMAIN_LEN}-byte limit",
            ascii.len()
        )));
    }
    Ok(ascii.into_bytes())
}

/// Packs a port into its 2-byte big-endian wire representation.
pub fn pack_port(port: u16) -> [u8; 2] {
    port.to_be_bytes()
}
