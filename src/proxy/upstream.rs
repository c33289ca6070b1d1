//! Upstream link
//!
//! The outbound TCP connection to the CONNECT target. A link starts with a
//! non-blocking connect and reports its outcome once the poller says the
//! socket is ready; after that it only moves bytes between the socket and the
//! relay buffers owned by its connection.

use super::buffer::{FillOutcome, RelayBuffer};
use super::interest::Readiness;
use super::registry::{Context, Handler};
use mio::net::TcpStream;
use mio::{Registry, Token};
use std::io;
use std::net::{Shutdown, SocketAddr, SocketAddrV4};
use tracing::{debug, trace};

/// Lifecycle of an upstream link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Non-blocking connect in progress
    Connecting,
    /// Connected, relaying bytes
    Relaying,
    /// Closed
    Closed,
}

/// Result of checking a connect in progress
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Spurious wakeup, still connecting
    Pending,
    /// Connection established
    Connected,
    /// Connection failed
    Failed(io::Error),
}

/// Outbound half of a proxied connection
#[derive(Debug)]
pub struct UpstreamLink {
    stream: TcpStream,
    token: Token,
    target: SocketAddrV4,
    state: LinkState,
    readiness: Readiness,
    sent: u64,
    received: u64,
}

impl UpstreamLink {
    /// Start connecting to `target` on behalf of connection `client`
    ///
    /// Fails only when the connect attempt is rejected synchronously.
    pub fn connect(target: SocketAddrV4, client: Token, ctx: &mut Context<'_>) -> io::Result<Self> {
        let stream = TcpStream::connect(SocketAddr::V4(target))?;
        let token = ctx.handlers.insert(Handler::Upstream { client });

        let mut link = UpstreamLink {
            stream,
            token,
            target,
            state: LinkState::Connecting,
            readiness: Readiness::default(),
            sent: 0,
            received: 0,
        };
        link.readiness.write(true);
        if let Err(e) = link.sync(ctx.registry) {
            ctx.handlers.remove(token);
            return Err(e);
        }

        debug!("Connecting to {} (token {})", target, token.0);
        Ok(link)
    }

    /// Token the link is registered under
    pub fn token(&self) -> Token {
        self.token
    }

    /// Target address
    pub fn target(&self) -> SocketAddrV4 {
        self.target
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Bytes written to the target
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Bytes read from the target
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Wanted interest; pushed to the poller by [`UpstreamLink::sync`]
    pub fn readiness_mut(&mut self) -> &mut Readiness {
        &mut self.readiness
    }

    /// Check whether the pending connect has finished
    ///
    /// Either outcome drops all interest: the connection decides when the
    /// link starts relaying.
    pub fn finish_connect(&mut self, registry: &Registry) -> io::Result<ConnectOutcome> {
        if self.state != LinkState::Connecting {
            return Ok(ConnectOutcome::Connected);
        }

        let outcome = match self.stream.take_error() {
            Ok(Some(e)) | Err(e) => ConnectOutcome::Failed(e),
            Ok(None) => match self.stream.peer_addr() {
                Ok(_) => ConnectOutcome::Connected,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                    trace!("Connect to {} still in progress", self.target);
                    return Ok(ConnectOutcome::Pending);
                }
                Err(e) => ConnectOutcome::Failed(e),
            },
        };

        if let ConnectOutcome::Connected = outcome {
            self.state = LinkState::Relaying;
            if let Err(e) = self.stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY towards {}: {}", self.target, e);
            }
        }
        self.readiness.none();
        self.sync(registry)?;
        Ok(outcome)
    }

    /// Read from the target into `client_bound`
    pub fn on_readable(&mut self, client_bound: &mut RelayBuffer) -> io::Result<FillOutcome> {
        let outcome = client_bound.fill_from(&mut self.stream)?;
        self.received += outcome.read as u64;
        trace!("Read {} bytes from {}", outcome.read, self.target);
        Ok(outcome)
    }

    /// Write `upstream_bound` to the target
    pub fn on_writable(&mut self, upstream_bound: &mut RelayBuffer) -> io::Result<usize> {
        let written = upstream_bound.drain_to(&mut self.stream)?;
        self.sent += written as u64;
        trace!("Wrote {} bytes to {}", written, self.target);
        Ok(written)
    }

    /// Push the wanted interest to the poller
    pub fn sync(&mut self, registry: &Registry) -> io::Result<()> {
        self.readiness.apply(registry, &mut self.stream, self.token)
    }

    /// Deregister, release the token and close the socket
    pub fn close(&mut self, ctx: &mut Context<'_>) {
        if self.state == LinkState::Closed {
            return;
        }
        if let Err(e) = self.readiness.release(ctx.registry, &mut self.stream) {
            debug!("Failed to deregister link to {}: {}", self.target, e);
        }
        ctx.handlers.remove(self.token);
        let _ = self.stream.shutdown(Shutdown::Both);
        self.state = LinkState::Closed;
    }
}
