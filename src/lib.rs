//! # nbsocks - Non-blocking SOCKS5 Proxy
//!
//! nbsocks is a single-threaded SOCKS5 proxy built on a readiness-driven
//! reactor. One event loop accepts clients, runs the SOCKS5 handshake,
//! resolves domain targets through an embedded UDP DNS resolver, connects
//! upstream and relays bytes in both directions.
//!
//! ## Features
//!
//! - **Single Reactor**: every socket is multiplexed on one `mio::Poll`
//! - **CONNECT Only**: no-auth negotiation, IPv4 and domain targets
//! - **Embedded Resolver**: one UDP socket, per-query retry deadlines, coalesced lookups
//! - **Bounded Memory**: one fixed buffer per direction with read/write backpressure
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nbsocks::config::load_config;
//! use nbsocks::Reactor;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let mut reactor = Reactor::bind(&config)?;
//!
//!     reactor.run()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> nbsocks -> Target
//!                     |
//!                     +-> DNS server (UDP)
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod dns;
pub mod error;
pub mod helper;
pub mod proxy;
pub mod socks;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{DnsError, ProxyError, Socks5Error, Socks5ReplyCode};
pub use proxy::{Reactor, ShutdownHandle};

/// Version of the nbsocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
