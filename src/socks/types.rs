//! SOCKS5 type definitions
//!
//! Defines the core types produced by the handshake codec.

use super::consts::*;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Outcome of a complete client greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    /// Method the server selects, or `SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE`
    pub method: u8,
}

impl Greeting {
    /// Whether "no authentication" was among the offered methods
    pub fn accepted(&self) -> bool {
        self.method == SOCKS5_AUTH_METHOD_NONE
    }

    /// Two-byte method selection reply
    pub fn reply(&self) -> [u8; 2] {
        [SOCKS5_VERSION, self.method]
    }
}

/// Target address for SOCKS5 CONNECT requests
///
/// Only IPv4 literals and domain names reach this type; IPv6 requests are
/// rejected by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IPv4 address
    Ipv4(Ipv4Addr),
    /// Domain name awaiting resolution
    Domain(String),
}

/// A parsed CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Requested destination
    pub target: TargetAddr,
    /// Requested destination port
    pub port: u16,
}

impl ConnectRequest {
    /// Socket address when the target is already an IPv4 literal
    pub fn socket_addr(&self) -> Option<SocketAddrV4> {
        match &self.target {
            TargetAddr::Ipv4(ip) => Some(SocketAddrV4::new(*ip, self.port)),
            TargetAddr::Domain(_) => None,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

impl fmt::Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target, self.port)
    }
}
