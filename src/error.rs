//! Error types for nbsocks
//!
//! This module defines all custom error types used throughout the proxy.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for nbsocks operations
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to bind a listening or resolver socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: SocketAddr,
        /// Underlying OS error
        source: io::Error,
    },

    /// DNS error
    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),
}

/// SOCKS5 specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Socks5Error {
    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// More bytes were received than the message declares
    #[error("Message too long: expected {expected} bytes, got {actual}")]
    MessageTooLong {
        /// Length the header declares
        expected: usize,
        /// Bytes actually buffered
        actual: usize,
    },

    /// Command not supported
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Invalid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
}

impl Socks5Error {
    /// Reply code sent to the client when this error ends a CONNECT request
    pub fn reply_code(&self) -> Socks5ReplyCode {
        match self {
            Socks5Error::CommandNotSupported(_) => Socks5ReplyCode::CommandNotSupported,
            Socks5Error::AddressTypeNotSupported(_) => Socks5ReplyCode::AddressTypeNotSupported,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

/// DNS codec and resolver errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// Query could not be serialized
    #[error("Failed to encode query: {0}")]
    Encode(String),

    /// Datagram is not a valid DNS message
    #[error("Failed to decode message: {0}")]
    Decode(String),

    /// Datagram decoded but is not a response carrying a question
    #[error("Not a DNS response")]
    NotAResponse,

    /// No upstream name server is configured
    #[error("No DNS server configured")]
    NoServer,
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl Socks5ReplyCode {
    /// Whether the reply commits the connection to relaying
    pub fn is_success(self) -> bool {
        self == Socks5ReplyCode::Succeeded
    }
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(other),
        }
    }
}
