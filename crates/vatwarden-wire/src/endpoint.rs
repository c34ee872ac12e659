use std::fmt;
use std::str::FromStr;

use crate::WireError;

pub const SCHEME: &str = "jrpc://";

/// Parsed `jrpc://host:port/target` sturdy ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub target: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, target: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            target: target.into(),
        }
    }

    pub fn parse(sturdy_ref: &str) -> Result<Self, WireError> {
        let invalid = || WireError::InvalidEndpoint(sturdy_ref.to_string());
        let rest = sturdy_ref.strip_prefix(SCHEME).ok_or_else(invalid)?;
        let (authority, target) = rest.split_once('/').ok_or_else(invalid)?;
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if host.is_empty() || target.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(host, port, target))
    }

    /// `host:port`, suitable for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}:{}/{}", self.host, self.port, self.target)
    }
}
