//! Username/password credentials shared across handshakes.

use std::fmt;

use bytes::Bytes;

/// A username/password pair, used by SOCKS5 (RFC 1929) and HTTP Basic proxy authorization.
///
/// Cheaply cloneable: both fields are [`Bytes`], so sharing one `Credentials` across concurrent
/// dials of the same [`ProxyDescriptor`](crate::ProxyDescriptor) does not allocate.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: Bytes,
    password: Bytes,
}

impl Credentials {
    /// Builds a credentials pair from owned strings.
    pub fn new(username: impl Into<Bytes>, password: impl Into<Bytes>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The username bytes.
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    /// The password bytes.
    pub fn password(&self) -> &[u8] {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .finish()
    }
}
