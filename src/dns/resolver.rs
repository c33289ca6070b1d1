//! Embedded DNS resolver
//!
//! [`Resolver`] owns one UDP socket connected to the upstream name server and
//! multiplexes every pending lookup over it. It never calls back into a
//! connection directly: each entry point returns the [`Resolution`]s it
//! produced and the reactor routes them to the waiting connections. A waiter
//! that has gone away in the meantime simply receives nothing.
//!
//! Query lifecycle:
//!
//! ```text
//! resolve() -> queued -> (writable) sent, deadline armed
//!                  ^                     |
//!                  |     deadline passed |  response matched
//!                  +---- attempts left --+-------------------> Resolution(addr)
//!                        attempts spent  +-------------------> Resolution(None)
//! ```

use super::codec::{self, DnsAnswer, MAX_DATAGRAM_SIZE};
use crate::helper::RetryPolicy;
use crate::proxy::Readiness;
use mio::net::UdpSocket;
use mio::{Registry, Token};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Final outcome of one waiter's lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Token of the connection that asked
    pub waiter: Token,
    /// Name that was looked up, in canonical form
    pub name: String,
    /// Resolved address, `None` when the name could not be resolved
    pub addr: Option<Ipv4Addr>,
}

/// One name being resolved, shared by every waiter asking for it
#[derive(Debug)]
struct PendingQuery {
    waiters: Vec<Token>,
    attempts: u32,
    enqueued_at: Instant,
    /// Set while a datagram is in flight
    deadline: Option<Instant>,
}

/// Single-socket UDP resolver driven by the reactor
#[derive(Debug)]
pub struct Resolver {
    socket: UdpSocket,
    token: Token,
    server: SocketAddr,
    policy: RetryPolicy,
    queue: VecDeque<String>,
    pending: HashMap<String, PendingQuery>,
    readiness: Readiness,
    next_id: u16,
    recv_buf: Vec<u8>,
}

impl Resolver {
    /// Open the resolver socket, connect it to `server` and register it
    pub fn bind(
        server: SocketAddr,
        token: Token,
        registry: &Registry,
        policy: RetryPolicy,
    ) -> io::Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(server)?;

        let mut resolver = Resolver {
            socket,
            token,
            server,
            policy,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            readiness: Readiness::default(),
            next_id: 1,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        };
        resolver.readiness.read(true);
        resolver.sync(registry)?;

        info!("DNS resolver started, server {}", server);
        Ok(resolver)
    }

    /// Upstream name server
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Number of names waiting to be sent or awaiting a response
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of queries currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.pending
            .values()
            .filter(|q| q.deadline.is_some())
            .count()
    }

    /// Earliest retry deadline among in-flight queries
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|q| q.deadline).min()
    }

    /// Queue a lookup of `name` on behalf of `waiter`
    ///
    /// Requests for a name that is already pending join the existing query.
    pub fn resolve(&mut self, registry: &Registry, name: &str, waiter: Token) -> io::Result<()> {
        let key = codec::canonical_name(name);

        if let Some(query) = self.pending.get_mut(&key) {
            if !query.waiters.contains(&waiter) {
                query.waiters.push(waiter);
            }
            debug!("DNS request for {} joins pending query", key);
            return Ok(());
        }

        info!("New DNS request: {}", key);
        self.pending.insert(
            key.clone(),
            PendingQuery {
                waiters: vec![waiter],
                attempts: 0,
                enqueued_at: Instant::now(),
                deadline: None,
            },
        );
        self.queue.push_back(key);
        self.sync(registry)
    }

    /// Forget `waiter`; queries nobody waits for any more are dropped
    pub fn cancel(&mut self, waiter: Token) {
        let mut abandoned = Vec::new();
        for (name, query) in self.pending.iter_mut() {
            query.waiters.retain(|w| *w != waiter);
            if query.waiters.is_empty() {
                abandoned.push(name.clone());
            }
        }

        for name in abandoned {
            debug!("DNS query for {} cancelled", name);
            self.pending.remove(&name);
            self.queue.retain(|queued| *queued != name);
        }
    }

    /// Send queued queries until the queue is empty or the socket is full
    pub fn on_writable(&mut self, registry: &Registry, now: Instant) -> io::Result<Vec<Resolution>> {
        let mut outcomes = Vec::new();

        while let Some(name) = self.queue.pop_front() {
            if !self.pending.contains_key(&name) {
                continue;
            }

            let id = self.next_query_id();
            let bytes = match codec::encode_query(id, &name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Cannot query {}: {}", name, e);
                    if let Some(query) = self.pending.remove(&name) {
                        outcomes.extend(fail(&name, query));
                    }
                    continue;
                }
            };

            match self.socket.send(&bytes) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.queue.push_front(name);
                    break;
                }
                // The attempt still counts; the deadline turns it into a retry
                Err(e) => warn!("Failed to send DNS query for {}: {}", name, e),
            }

            if let Some(query) = self.pending.get_mut(&name) {
                query.attempts += 1;
                query.deadline = Some(self.policy.deadline_after(now));
                debug!(
                    "DNS query #{} for {} sent (attempt {}/{}, waiting {:?})",
                    id,
                    name,
                    query.attempts,
                    self.policy.max_attempts,
                    now.saturating_duration_since(query.enqueued_at)
                );
            }
        }

        self.sync(registry)?;
        Ok(outcomes)
    }

    /// Read every available datagram and complete the matching queries
    ///
    /// An empty datagram is taken as a sign that in-flight datagrams were lost:
    /// every in-flight query is retried or, if out of attempts, failed.
    pub fn on_readable(&mut self, registry: &Registry, now: Instant) -> io::Result<Vec<Resolution>> {
        let mut outcomes = Vec::new();

        loop {
            match self.socket.recv(&mut self.recv_buf) {
                Ok(0) => {
                    debug!("Empty DNS datagram, treating in-flight queries as lost");
                    outcomes.extend(self.expire(now, true));
                }
                Ok(n) => match codec::decode_response(&self.recv_buf[..n]) {
                    Ok(answer) => outcomes.extend(self.complete(answer)),
                    Err(e) => debug!("Discarding DNS datagram: {}", e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // ICMP port unreachable is reported once; lost queries are retried by deadline
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    warn!("DNS server {} refused the query", self.server);
                }
                Err(e) => {
                    warn!("DNS receive error: {}", e);
                    break;
                }
            }
        }

        self.sync(registry)?;
        Ok(outcomes)
    }

    /// Retry or fail every in-flight query whose deadline has passed
    pub fn on_timeout(&mut self, registry: &Registry, now: Instant) -> io::Result<Vec<Resolution>> {
        let outcomes = self.expire(now, false);
        self.sync(registry)?;
        Ok(outcomes)
    }

    /// Drop every pending query and deregister the socket
    pub fn shutdown(&mut self, registry: &Registry) -> io::Result<()> {
        if !self.pending.is_empty() {
            info!("Cancelling {} outstanding DNS queries", self.pending.len());
        }
        self.pending.clear();
        self.queue.clear();
        self.readiness.release(registry, &mut self.socket)
    }

    fn complete(&mut self, answer: DnsAnswer) -> Vec<Resolution> {
        let Some(query) = self.pending.remove(&answer.name) else {
            debug!("Unmatched DNS response for {}", answer.name);
            return Vec::new();
        };
        self.queue.retain(|queued| *queued != answer.name);

        match answer.addr {
            Some(addr) => info!("Resolved {} to {}", answer.name, addr),
            None => info!("No A record for {}", answer.name),
        }

        query
            .waiters
            .into_iter()
            .map(|waiter| Resolution {
                waiter,
                name: answer.name.clone(),
                addr: answer.addr,
            })
            .collect()
    }

    fn expire(&mut self, now: Instant, all: bool) -> Vec<Resolution> {
        // Collect first; the table is mutated below
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, q)| q.deadline.is_some_and(|deadline| all || deadline <= now))
            .map(|(name, _)| name.clone())
            .collect();

        let mut outcomes = Vec::new();
        for name in expired {
            let Some(query) = self.pending.get_mut(&name) else {
                continue;
            };

            if self.policy.may_retry(query.attempts) {
                trace!("DNS query for {} timed out, requeueing", name);
                query.deadline = None;
                self.queue.push_back(name);
            } else if let Some(query) = self.pending.remove(&name) {
                warn!(
                    "DNS query for {} failed after {} attempts",
                    name, query.attempts
                );
                outcomes.extend(fail(&name, query));
            }
        }
        outcomes
    }

    fn next_query_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn sync(&mut self, registry: &Registry) -> io::Result<()> {
        self.readiness.read(true).write(!self.queue.is_empty());
        self.readiness
            .apply(registry, &mut self.socket, self.token)
    }
}

fn fail(name: &str, query: PendingQuery) -> Vec<Resolution> {
    query
        .waiters
        .into_iter()
        .map(|waiter| Resolution {
            waiter,
            name: name.to_string(),
            addr: None,
        })
        .collect()
}
