use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::error::TransportError;

/// Socket protocol used for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A network endpoint such as `tcp://192.168.1.2:1234` or `udp://10.0.0.5:5000`.
///
/// A bare `host:port` is taken as TCP. Host names are resolved once at parse
/// time; the first resolved address wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub addr: SocketAddr,
}

impl Endpoint {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            protocol: Protocol::Tcp,
            addr,
        }
    }

    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            protocol: Protocol::Udp,
            addr,
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (protocol, rest) = if let Some(rest) = trimmed.strip_prefix("tcp://") {
            (Protocol::Tcp, rest)
        } else if let Some(rest) = trimmed.strip_prefix("udp://") {
            (Protocol::Udp, rest)
        } else if trimmed.contains("://") {
            return Err(TransportError::InvalidEndpoint {
                input: input.to_string(),
                reason: "scheme must be tcp:// or udp://".to_string(),
            });
        } else {
            (Protocol::Tcp, trimmed)
        };

        if let Ok(addr) = rest.parse::<SocketAddr>() {
            return Ok(Self { protocol, addr });
        }

        let mut resolved = rest
            .to_socket_addrs()
            .map_err(|err| TransportError::InvalidEndpoint {
                input: input.to_string(),
                reason: err.to_string(),
            })?;
        let addr = resolved
            .next()
            .ok_or_else(|| TransportError::InvalidEndpoint {
                input: input.to_string(),
                reason: "host did not resolve to any address".to_string(),
            })?;
        Ok(Self { protocol, addr })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol.scheme(), self.addr)
    }
}
