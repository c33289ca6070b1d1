//! The event loop
//!
//! One thread, one [`mio::Poll`]. Each turn waits for readiness (bounded by
//! the resolver's earliest retry deadline), dispatches every event to the
//! handler its token names, then lets the resolver expire overdue queries.
//! Per-connection failures are handled inside the connection; only poller
//! failures end the loop.

use super::connection::Connection;
use super::registry::{Context, Handler, HandlerRegistry, Ready, LISTENER, RESOLVER, WAKER};
use crate::config::Config;
use crate::dns::{Resolution, Resolver};
use crate::error::ProxyError;
use crate::helper::bind_listener;
use anyhow::{Context as _, Result};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Cloneable handle that stops a running [`Reactor`] from any thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Ask the reactor to stop and wake it up
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake()
    }

    /// Whether shutdown has been requested
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Single-threaded SOCKS5 proxy
#[derive(Debug)]
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    handlers: HandlerRegistry,
    connections: HashMap<Token, Connection>,
    resolver: Resolver,
    buffer_size: usize,
    shutdown: ShutdownHandle,
}

impl Reactor {
    /// Bind the listener and resolver sockets described by `config`
    pub fn bind(config: &Config) -> Result<Self> {
        let listen_addr = config.server.socket_addr()?;
        let dns_server = config.dns.server_addr()?;

        let poll = Poll::new().context("Failed to create poller")?;

        let listener = bind_listener(listen_addr, config.server.backlog).map_err(|source| {
            ProxyError::Bind {
                addr: listen_addr,
                source,
            }
        })?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("Failed to register listener")?;

        let resolver = Resolver::bind(
            dns_server,
            RESOLVER,
            poll.registry(),
            config.dns.retry_policy(),
        )
        .map_err(|source| ProxyError::Bind {
            addr: dns_server,
            source,
        })?;

        let waker = Waker::new(poll.registry(), WAKER).context("Failed to create waker")?;
        let shutdown = ShutdownHandle {
            waker: Arc::new(waker),
            requested: Arc::new(AtomicBool::new(false)),
        };

        Ok(Reactor {
            poll,
            events: Events::with_capacity(config.server.max_events),
            listener,
            local_addr,
            handlers: HandlerRegistry::new(),
            connections: HashMap::new(),
            resolver,
            buffer_size: config.server.buffer_size,
            shutdown,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Name server the resolver queries
    pub fn dns_server(&self) -> SocketAddr {
        self.resolver.server()
    }

    /// Handle for stopping [`Reactor::run`]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of live client connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until shutdown is requested
    ///
    /// Only a failing poller ends the loop early, reported as [`ProxyError::Io`].
    pub fn run(&mut self) -> Result<(), ProxyError> {
        info!("SOCKS5 proxy listening on {}", self.local_addr);

        while !self.shutdown.is_requested() {
            self.turn()?;
        }

        self.stop();
        Ok(())
    }

    /// One wait-and-dispatch cycle
    pub fn turn(&mut self) -> io::Result<()> {
        let timeout = self.poll_timeout(Instant::now());
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        if self.events.is_empty() {
            trace!("Poll timed out");
        }

        let ready: Vec<(Token, Ready)> = self
            .events
            .iter()
            .map(|event| (event.token(), Ready::from(event)))
            .collect();
        for (token, ready) in ready {
            self.dispatch(token, ready);
        }

        let now = Instant::now();
        if self.resolver.next_deadline().is_some_and(|d| d <= now) {
            match self.resolver.on_timeout(self.poll.registry(), now) {
                Ok(resolutions) => self.deliver(resolutions),
                Err(e) => warn!("DNS retry failed: {}", e),
            }
        }
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.resolver
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    fn dispatch(&mut self, token: Token, ready: Ready) {
        match self.handlers.get(token) {
            Some(Handler::Listener) => self.accept(),
            Some(Handler::Resolver) => self.drive_resolver(ready),
            Some(Handler::Waker) => debug!("Reactor woken"),
            Some(Handler::Client) => {
                self.with_connection(token, |conn, ctx| conn.on_client_ready(ready, ctx))
            }
            Some(Handler::Upstream { client }) => {
                self.with_connection(client, |conn, ctx| conn.on_upstream_ready(ready, ctx))
            }
            None => trace!("Event for released token {}", token.0),
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.open(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    break;
                }
            }
        }
    }

    fn open(&mut self, stream: TcpStream, peer: SocketAddr) {
        let token = self.handlers.insert(Handler::Client);
        let mut conn = Connection::new(stream, peer, token, self.buffer_size);

        let mut ctx = Context {
            registry: self.poll.registry(),
            handlers: &mut self.handlers,
            resolver: &mut self.resolver,
        };
        if let Err(e) = conn.open(&mut ctx) {
            warn!("Failed to register connection from {}: {}", peer, e);
            conn.close(&mut ctx);
            return;
        }

        info!(
            "Accepted connection from {} (token {}, {} active)",
            peer,
            token.0,
            self.handlers.active()
        );
        self.connections.insert(token, conn);
    }

    fn drive_resolver(&mut self, ready: Ready) {
        let now = Instant::now();
        let mut resolutions = Vec::new();

        if ready.writable {
            match self.resolver.on_writable(self.poll.registry(), now) {
                Ok(r) => resolutions.extend(r),
                Err(e) => warn!("DNS send failed: {}", e),
            }
        }
        if ready.readable {
            match self.resolver.on_readable(self.poll.registry(), now) {
                Ok(r) => resolutions.extend(r),
                Err(e) => warn!("DNS receive failed: {}", e),
            }
        }
        self.deliver(resolutions);
    }

    fn deliver(&mut self, resolutions: Vec<Resolution>) {
        for resolution in resolutions {
            let addr = resolution.addr;
            self.with_connection(resolution.waiter, |conn, ctx| conn.on_resolved(addr, ctx));
        }
    }

    /// Run `f` on connection `id`, dropping the connection if it closed
    fn with_connection<F>(&mut self, id: Token, f: F)
    where
        F: FnOnce(&mut Connection, &mut Context<'_>),
    {
        let Some(conn) = self.connections.get_mut(&id) else {
            trace!("No connection for token {}", id.0);
            return;
        };

        let mut ctx = Context {
            registry: self.poll.registry(),
            handlers: &mut self.handlers,
            resolver: &mut self.resolver,
        };
        f(conn, &mut ctx);

        if conn.is_closed() {
            self.connections.remove(&id);
        }
    }

    fn stop(&mut self) {
        info!(
            "Shutting down, closing {} connections",
            self.connections.len()
        );

        let mut ctx = Context {
            registry: self.poll.registry(),
            handlers: &mut self.handlers,
            resolver: &mut self.resolver,
        };
        for (_, mut conn) in self.connections.drain() {
            conn.close(&mut ctx);
        }

        if let Err(e) = self.resolver.shutdown(self.poll.registry()) {
            debug!("Failed to stop resolver: {}", e);
        }
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!("Failed to deregister listener: {}", e);
        }
    }
}
