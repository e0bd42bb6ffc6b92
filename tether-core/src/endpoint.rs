//! Connect target addressing.
//!
//! Targets are IP literals plus a port. No name resolution happens here: the
//! dispatcher thread must never block on DNS.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Address a connect request is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target(SocketAddr);

impl Target {
    /// Build a target from an IP literal and a port.
    ///
    /// # Examples
    ///
    /// ```
    /// use tether_core::endpoint::Target;
    ///
    /// let target = Target::from_parts("127.0.0.1", 9).unwrap();
    /// assert_eq!(target.to_string(), "tcp://127.0.0.1:9");
    ///
    /// let target = Target::from_parts("::1", 8080).unwrap();
    /// assert!(target.addr().is_ipv6());
    /// ```
    pub fn from_parts(address: &str, port: u16) -> Result<Self, TargetError> {
        // Bracketed IPv6 literals are accepted for symmetry with `tcp://[::1]:port`.
        let host = address
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(address);
        let ip = host
            .parse::<IpAddr>()
            .map_err(|_| TargetError::InvalidAddress(address.to_string()))?;
        Ok(Self(SocketAddr::new(ip, port)))
    }

    /// Target for a request's `address` and `port`.
    ///
    /// `address` is either an IP literal, paired with `port`, or a full
    /// `tcp://ip:port` target that carries its own port.
    ///
    /// ```
    /// use tether_core::endpoint::Target;
    ///
    /// let url = Target::from_request("tcp://10.0.0.1:80", 0).unwrap();
    /// assert_eq!(url.addr().port(), 80);
    /// assert_eq!(Target::from_request("10.0.0.1", 22).unwrap().addr().port(), 22);
    /// ```
    pub fn from_request(address: &str, port: u16) -> Result<Self, TargetError> {
        if address.contains("://") {
            Self::parse(address)
        } else {
            Self::from_parts(address, port)
        }
    }

    /// Parse `tcp://ip:port` or a bare `ip:port`.
    pub fn parse(s: &str) -> Result<Self, TargetError> {
        s.parse()
    }

    /// The socket address to connect to.
    #[inline]
    pub const fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for Target {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = match s.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some(_) => return Err(TargetError::InvalidScheme(s.to_string())),
            None => s,
        };
        rest.parse::<SocketAddr>()
            .map(Self)
            .map_err(|_| TargetError::InvalidAddress(rest.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.0)
    }
}

/// Errors that can occur when parsing a target.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("Invalid scheme in target: {0} (expected tcp://)")]
    InvalidScheme(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
}
