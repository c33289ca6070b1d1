//! Resolver configuration
//!
//! Defines the upstream name server and the retry policy of the embedded resolver.

use crate::error::{DnsError, ProxyError};
use crate::helper::{RetryPolicy, DEFAULT_DNS_MAX_ATTEMPTS, DEFAULT_DNS_RETRY_INTERVAL_MS};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Port used when `server` names only an address
const DNS_PORT: u16 = 53;

fn default_retry_interval_ms() -> u64 {
    DEFAULT_DNS_RETRY_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_DNS_MAX_ATTEMPTS
}

/// Embedded resolver configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DnsConfig {
    /// Upstream name server ("1.1.1.1:53" or "1.1.1.1"); system configuration when absent
    #[serde(default)]
    pub server: Option<String>,

    /// Wait before an unanswered query is resent, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Times a query is sent before the lookup fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            server: None,
            retry_interval_ms: default_retry_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl DnsConfig {
    /// Retry policy built from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_interval_ms))
    }

    /// Name server to query: the configured one, else the system's first
    pub fn server_addr(&self) -> Result<SocketAddr, ProxyError> {
        match &self.server {
            Some(server) => parse_server(server),
            None => system_name_server(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than zero".to_string());
        }
        if self.retry_interval_ms == 0 {
            return Err("retry_interval_ms must be greater than zero".to_string());
        }
        if let Some(server) = &self.server {
            parse_server(server).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

fn parse_server(server: &str) -> Result<SocketAddr, ProxyError> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ProxyError::Config(format!("Invalid DNS server address: {}", server)))
}

/// First name server from the operating system's resolver configuration
pub fn system_name_server() -> Result<SocketAddr, ProxyError> {
    let (config, _opts) = hickory_resolver::system_conf::read_system_conf().map_err(|e| {
        ProxyError::Config(format!("Failed to read system DNS configuration: {}", e))
    })?;

    let server = config
        .name_servers()
        .iter()
        .map(|ns| ns.socket_addr)
        .next()
        .ok_or(ProxyError::Dns(DnsError::NoServer))?;

    debug!("Using system name server {}", server);
    Ok(server)
}
