//! Listener and relay configuration
//!
//! Defines where the proxy listens and how large its per-connection buffers are.

use crate::error::ProxyError;
use crate::helper::{DEFAULT_BACKLOG, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_EVENTS, MIN_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};

/// Default listen address
fn default_listen_addr() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

/// Listener configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to accept SOCKS5 clients on (e.g., "127.0.0.1:1080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Capacity of each relay direction, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Events fetched per poll
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            buffer_size: default_buffer_size(),
            max_events: default_max_events(),
            backlog: default_backlog(),
        }
    }
}

impl ServerConfig {
    /// Resolve `listen_addr`, preferring an IPv4 address
    pub fn socket_addr(&self) -> Result<SocketAddr, ProxyError> {
        let addrs: Vec<SocketAddr> = self
            .listen_addr
            .to_socket_addrs()
            .map_err(|e| {
                ProxyError::Config(format!("Invalid listen address {}: {}", self.listen_addr, e))
            })?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                ProxyError::Config(format!("Listen address {} resolved to nothing", self.listen_addr))
            })
    }

    /// Replace the port of `listen_addr`, keeping the host
    pub fn set_port(&mut self, port: u16) {
        let host = match self.listen_addr.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.listen_addr.clone(),
        };
        self.listen_addr = format!("{}:{}", host, port);
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(format!(
                "buffer_size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, self.buffer_size
            ));
        }
        if self.max_events == 0 {
            return Err("max_events must be greater than zero".to_string());
        }
        if self.backlog <= 0 {
            return Err("backlog must be greater than zero".to_string());
        }
        Ok(())
    }
}
