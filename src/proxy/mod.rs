//! Proxy engine
//!
//! A single-threaded reactor that accepts SOCKS5 clients, drives each one
//! through the handshake, connects upstream and relays bytes both ways.
//!
//! # Architecture
//!
//! ```text
//! Client <-> Connection --(upstream_bound)--> UpstreamLink <-> Target
//!                       <--(client_bound)---
//!                 |
//!                 +-- resolve(host) --> Resolver <-> DNS server (UDP)
//! ```

mod buffer;
mod connection;
mod interest;
mod reactor;
mod registry;
mod upstream;

pub use buffer::{FillOutcome, RelayBuffer};
pub use connection::{ConnState, Connection};
pub use interest::Readiness;
pub use reactor::{Reactor, ShutdownHandle};
pub use registry::{Context, Handler, HandlerRegistry, Ready, LISTENER, RESOLVER, WAKER};
pub use upstream::{ConnectOutcome, LinkState, UpstreamLink};
