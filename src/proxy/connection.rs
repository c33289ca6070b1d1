//! Client connection state machine
//!
//! A [`Connection`] owns the accepted client socket, its upstream link and
//! the two relay buffers between them. It walks through the SOCKS5 handshake
//! one readiness event at a time:
//!
//! ```text
//! GreetingRead -> GreetingWrite -> RequestRead -+-> Resolving ---------+
//!                      |                        |                      v
//!                      | no acceptable method   +-> ConnectingUpstream -> RequestWrite -> Relay
//!                      v                        |                           |
//!                   Closed <--------------------+---- failure reply --------+
//! ```
//!
//! During the handshake `upstream_bound` collects the client's message and
//! `client_bound` holds the reply being written. In `Relay` they carry
//! client-to-target and target-to-client bytes. Each side reads only while
//! the buffer it fills is empty and writes only while the buffer it drains
//! holds data, which is the whole of the backpressure scheme.

use super::buffer::RelayBuffer;
use super::interest::Readiness;
use super::registry::{Context, Ready};
use super::upstream::{ConnectOutcome, UpstreamLink};
use crate::error::Socks5ReplyCode;
use crate::socks::{self, ConnectRequest};
use mio::net::TcpStream;
use mio::Token;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4};
use tracing::{debug, info, trace, warn};

/// Handshake and relay stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the method-selection message
    GreetingRead,
    /// Writing the method-selection reply
    GreetingWrite {
        /// Whether "no authentication" was offered
        accepted: bool,
    },
    /// Waiting for the CONNECT request
    RequestRead,
    /// Waiting for the resolver
    Resolving {
        /// Name being resolved
        host: String,
    },
    /// Waiting for the upstream connect to finish
    ConnectingUpstream {
        /// Address being connected to
        target: SocketAddrV4,
    },
    /// Writing the CONNECT reply
    RequestWrite {
        /// Code carried by the reply
        code: Socks5ReplyCode,
    },
    /// Relaying in both directions
    Relay,
    /// Finished
    Closed,
}

/// One accepted client and everything it drives
#[derive(Debug)]
pub struct Connection {
    token: Token,
    peer: SocketAddr,
    stream: TcpStream,
    state: ConnState,
    readiness: Readiness,
    link: Option<UpstreamLink>,
    upstream_bound: RelayBuffer,
    client_bound: RelayBuffer,
    request: Option<ConnectRequest>,
    resolved: Option<Ipv4Addr>,
    draining: bool,
}

impl Connection {
    /// Wrap an accepted client socket
    pub fn new(stream: TcpStream, peer: SocketAddr, token: Token, buffer_size: usize) -> Self {
        Connection {
            token,
            peer,
            stream,
            state: ConnState::GreetingRead,
            readiness: Readiness::default(),
            link: None,
            upstream_bound: RelayBuffer::new(buffer_size),
            client_bound: RelayBuffer::new(buffer_size),
            request: None,
            resolved: None,
            draining: false,
        }
    }

    /// Register the client socket for the greeting
    pub fn open(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        trace!(
            "Connection {} uses {} byte relay buffers",
            self.token.0,
            self.upstream_bound.capacity()
        );
        self.readiness.read(true);
        self.sync(ctx)
    }

    /// Connection id
    pub fn token(&self) -> Token {
        self.token
    }

    /// Client address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current stage
    pub fn state(&self) -> &ConnState {
        &self.state
    }

    /// Whether the connection has been torn down
    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Handle readiness on the client socket
    pub fn on_client_ready(&mut self, ready: Ready, ctx: &mut Context<'_>) {
        let result = match self.state {
            ConnState::GreetingRead if ready.readable => self.read_greeting(ctx),
            ConnState::GreetingWrite { accepted } if ready.writable => {
                self.write_greeting(accepted, ctx)
            }
            ConnState::RequestRead if ready.readable => self.read_request(ctx),
            ConnState::RequestWrite { code } if ready.writable => self.write_reply(code, ctx),
            ConnState::Relay => self.relay_client(ready, ctx),
            _ => {
                trace!("Ignoring client event in {:?}", self.state);
                Ok(())
            }
        };
        self.finish(result, ctx);
    }

    /// Handle readiness on the upstream socket
    pub fn on_upstream_ready(&mut self, ready: Ready, ctx: &mut Context<'_>) {
        let result = match self.state {
            ConnState::ConnectingUpstream { target } => self.finish_connect(target, ctx),
            ConnState::Relay => self.relay_upstream(ready, ctx),
            _ => {
                trace!("Ignoring upstream event in {:?}", self.state);
                Ok(())
            }
        };
        self.finish(result, ctx);
    }

    /// Handle the resolver's answer for the requested domain
    pub fn on_resolved(&mut self, addr: Option<Ipv4Addr>, ctx: &mut Context<'_>) {
        let host = match &self.state {
            ConnState::Resolving { host } => host.clone(),
            _ => {
                debug!("Stale resolution for connection {}", self.token.0);
                return;
            }
        };

        let result = match addr {
            Some(ip) => {
                debug!("{} resolved to {}", host, ip);
                let port = self.request.as_ref().map_or(0, |r| r.port);
                self.connect_upstream(SocketAddrV4::new(ip, port), ctx)
            }
            None => {
                warn!("Could not resolve {} for {}", host, self.peer);
                self.send_reply(Socks5ReplyCode::HostUnreachable, ctx)
            }
        };
        self.finish(result, ctx);
    }

    /// Tear down both legs and release every registration
    pub fn close(&mut self, ctx: &mut Context<'_>) {
        if self.is_closed() {
            return;
        }

        if let Err(e) = self.readiness.release(ctx.registry, &mut self.stream) {
            debug!("Failed to deregister client {}: {}", self.peer, e);
        }
        ctx.handlers.remove(self.token);
        ctx.resolver.cancel(self.token);
        let _ = self.stream.shutdown(Shutdown::Both);

        match self.link.as_mut() {
            Some(link) => {
                link.close(ctx);
                info!(
                    "Connection {} -> {} closed ({} bytes up, {} bytes down)",
                    self.peer,
                    link.target(),
                    link.sent(),
                    link.received()
                );
            }
            None => debug!("Connection {} closed", self.peer),
        }
        self.state = ConnState::Closed;
    }

    fn finish(&mut self, result: io::Result<()>, ctx: &mut Context<'_>) {
        if let Err(e) = result {
            debug!("Connection {} failed: {}", self.peer, e);
            self.close(ctx);
        }
    }

    fn read_greeting(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        let outcome = self.upstream_bound.fill_from(&mut self.stream)?;

        match socks::parse_greeting(self.upstream_bound.as_slice()) {
            Ok(Some(greeting)) => {
                trace!("Greeting from {}: {:?}", self.peer, greeting);
                if !greeting.accepted() {
                    warn!("{} offered no acceptable authentication method", self.peer);
                }
                self.upstream_bound.clear();
                self.client_bound.push(&greeting.reply());
                self.state = ConnState::GreetingWrite {
                    accepted: greeting.accepted(),
                };
                self.readiness.read(false).write(true);
                self.sync(ctx)
            }
            Ok(None) if outcome.eof => {
                debug!("{} closed during greeting", self.peer);
                self.close(ctx);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Bad greeting from {}: {}", self.peer, e);
                self.upstream_bound.clear();
                self.client_bound.push(&socks::rejection());
                self.state = ConnState::GreetingWrite { accepted: false };
                self.readiness.read(false).write(true);
                self.sync(ctx)
            }
        }
    }

    fn write_greeting(&mut self, accepted: bool, ctx: &mut Context<'_>) -> io::Result<()> {
        self.client_bound.drain_to(&mut self.stream)?;
        if !self.client_bound.is_empty() {
            return Ok(());
        }

        if accepted {
            self.state = ConnState::RequestRead;
            self.readiness.read(true).write(false);
            self.sync(ctx)
        } else {
            self.close(ctx);
            Ok(())
        }
    }

    fn read_request(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        let outcome = self.upstream_bound.fill_from(&mut self.stream)?;

        match socks::parse_request(self.upstream_bound.as_slice()) {
            Ok(Some(request)) => {
                self.upstream_bound.clear();
                info!("SOCKS5 CONNECT request from {} to {}", self.peer, request);
                let direct = request.socket_addr();
                let host = request.target.to_string();
                self.request = Some(request);

                if let Some(target) = direct {
                    return self.connect_upstream(target, ctx);
                }
                self.readiness.none();
                self.sync(ctx)?;
                ctx.resolver.resolve(ctx.registry, &host, self.token)?;
                self.state = ConnState::Resolving { host };
                Ok(())
            }
            Ok(None) if outcome.eof => {
                debug!("{} closed during request", self.peer);
                self.close(ctx);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Bad request from {}: {}", self.peer, e);
                self.upstream_bound.clear();
                self.send_reply(e.reply_code(), ctx)
            }
        }
    }

    fn connect_upstream(&mut self, target: SocketAddrV4, ctx: &mut Context<'_>) -> io::Result<()> {
        self.resolved = Some(*target.ip());
        self.readiness.none();
        self.sync(ctx)?;

        match UpstreamLink::connect(target, self.token, ctx) {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnState::ConnectingUpstream { target };
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", target, e);
                self.send_reply(Socks5ReplyCode::HostUnreachable, ctx)
            }
        }
    }

    fn finish_connect(&mut self, target: SocketAddrV4, ctx: &mut Context<'_>) -> io::Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no upstream link"));
        };

        match link.finish_connect(ctx.registry)? {
            ConnectOutcome::Pending => Ok(()),
            ConnectOutcome::Connected => {
                debug!("Connected to {} for {}", target, self.peer);
                self.send_reply(Socks5ReplyCode::Succeeded, ctx)
            }
            ConnectOutcome::Failed(e) => {
                warn!("Failed to connect to {}: {}", target, e);
                link.close(ctx);
                self.link = None;
                self.send_reply(Socks5ReplyCode::HostUnreachable, ctx)
            }
        }
    }

    /// Queue the CONNECT reply and wait for the client to accept it
    fn send_reply(&mut self, code: Socks5ReplyCode, ctx: &mut Context<'_>) -> io::Result<()> {
        let bound = SocketAddrV4::new(
            self.resolved.unwrap_or(Ipv4Addr::UNSPECIFIED),
            self.request.as_ref().map_or(0, |r| r.port),
        );
        self.client_bound.clear();
        self.client_bound.push(&socks::build_reply(code, bound));
        self.state = ConnState::RequestWrite { code };
        self.readiness.read(false).write(true);
        self.sync(ctx)
    }

    fn write_reply(&mut self, code: Socks5ReplyCode, ctx: &mut Context<'_>) -> io::Result<()> {
        self.client_bound.drain_to(&mut self.stream)?;
        if !self.client_bound.is_empty() {
            return Ok(());
        }

        if !code.is_success() {
            debug!("Sent {:?} to {}", code, self.peer);
            self.close(ctx);
            return Ok(());
        }

        self.state = ConnState::Relay;
        if let Some(link) = &self.link {
            info!("SOCKS5 tunnel established: {} <-> {}", self.peer, link.target());
        }
        self.rearm(ctx)
    }

    fn relay_client(&mut self, ready: Ready, ctx: &mut Context<'_>) -> io::Result<()> {
        if ready.readable && self.readiness.wants_read() {
            let outcome = self.upstream_bound.fill_from(&mut self.stream)?;
            if outcome.eof {
                self.begin_drain("client");
            }
        }
        if ready.writable && !self.client_bound.is_empty() {
            self.client_bound.drain_to(&mut self.stream)?;
        }
        self.settle(ctx)
    }

    fn relay_upstream(&mut self, ready: Ready, ctx: &mut Context<'_>) -> io::Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no upstream link"));
        };

        let mut eof = false;
        if ready.readable && link.readiness_mut().wants_read() {
            eof = link.on_readable(&mut self.client_bound)?.eof;
        }
        if ready.writable && !self.upstream_bound.is_empty() {
            link.on_writable(&mut self.upstream_bound)?;
        }
        if eof {
            self.begin_drain("upstream");
        }
        self.settle(ctx)
    }

    fn begin_drain(&mut self, side: &str) {
        if !self.draining {
            debug!("End of stream from {} side of {}, draining", side, self.peer);
            self.draining = true;
        }
    }

    /// Close once a drained connection has flushed both buffers, else re-arm
    fn settle(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        if self.draining && self.upstream_bound.is_empty() && self.client_bound.is_empty() {
            self.close(ctx);
            return Ok(());
        }
        self.rearm(ctx)
    }

    /// Derive both legs' interest from the buffers
    fn rearm(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        let reading = !self.draining;
        self.readiness
            .read(reading && self.upstream_bound.is_empty())
            .write(!self.client_bound.is_empty());
        self.sync(ctx)?;

        if let Some(link) = self.link.as_mut() {
            link.readiness_mut()
                .read(reading && self.client_bound.is_empty())
                .write(!self.upstream_bound.is_empty());
            link.sync(ctx.registry)?;
        }
        Ok(())
    }

    fn sync(&mut self, ctx: &mut Context<'_>) -> io::Result<()> {
        self.readiness
            .apply(ctx.registry, &mut self.stream, self.token)
    }
}
