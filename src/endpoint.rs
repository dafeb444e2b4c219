//! Endpoint addressing for RPC servers.

use std::fmt;
use std::str::FromStr;

use crate::error::PoolError;

/// A normalized RPC server address.
///
/// An `Endpoint` is a plain value: host and port, nothing else. Hostnames
/// are normalized to ASCII lowercase so that equality and hashing do not
/// depend on how the discovery layer happened to spell them.
///
/// Endpoints parse from `"host:port"` strings. The input must split into
/// exactly two nonempty parts on a single `:`, and the port must be a valid
/// `u16`. Anything else is [`PoolError::MalformedEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// The normalized host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &'static str| PoolError::MalformedEndpoint {
            input: s.to_string(),
            reason,
        };

        let mut parts = s.split(':');
        let host = parts.next().unwrap_or_default();
        let port = parts.next().ok_or_else(|| malformed("missing ':' separator"))?;
        if parts.next().is_some() {
            return Err(malformed("more than one ':' separator"));
        }
        if host.is_empty() {
            return Err(malformed("empty host"));
        }
        if port.is_empty() {
            return Err(malformed("empty port"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| malformed("port is not a valid u16"))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
