//! Helper utilities for nbsocks
//!
//! This module provides common constants, the DNS retry policy and socket
//! construction helpers used throughout the proxy.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

/// Default per-direction relay buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Smallest accepted relay buffer; must hold a whole handshake message
pub const MIN_BUFFER_SIZE: usize = 512;

/// Default number of events fetched per poll
pub const DEFAULT_MAX_EVENTS: usize = 1024;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Default wait before a DNS query is considered lost, in milliseconds
pub const DEFAULT_DNS_RETRY_INTERVAL_MS: u64 = 1000;

/// Default number of attempts per DNS query
pub const DEFAULT_DNS_MAX_ATTEMPTS: u32 = 3;

/// Retry policy for DNS queries sent over UDP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of times a query is sent
    pub max_attempts: u32,
    /// How long to wait for a response before resending
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_DNS_MAX_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_DNS_RETRY_INTERVAL_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt limit and interval
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            interval,
        }
    }

    /// Deadline for a query sent at `sent_at`
    pub fn deadline_after(&self, sent_at: Instant) -> Instant {
        sent_at + self.interval
    }

    /// Whether a query sent `attempts` times may be sent again
    pub fn may_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Bind a non-blocking listening socket with SO_REUSEADDR set
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}
