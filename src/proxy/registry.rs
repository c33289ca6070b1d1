//! Token-to-handler table
//!
//! Every source registered with the poller gets a token here, and the token
//! records what kind of handler its events belong to. Connections and their
//! upstream links live in the reactor; this table only says who to call.

use crate::dns::Resolver;
use mio::event::Event;
use mio::{Registry, Token};
use std::collections::HashMap;

/// Token of the listening socket
pub const LISTENER: Token = Token(0);
/// Token of the resolver socket
pub const RESOLVER: Token = Token(1);
/// Token of the shutdown waker
pub const WAKER: Token = Token(2);

const FIRST_DYNAMIC: usize = 3;
const LAST_DYNAMIC: usize = usize::MAX - 1;

/// What an event's token refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Accept new clients
    Listener,
    /// Drive the embedded resolver
    Resolver,
    /// Shutdown was requested from another thread
    Waker,
    /// Client side of a connection; the token is the connection id
    Client,
    /// Upstream side of the connection identified by `client`
    Upstream {
        /// Connection owning the link
        client: Token,
    },
}

/// Readiness reported for one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    /// Reading may make progress (data, EOF or a pending error)
    pub readable: bool,
    /// Writing may make progress (or a pending error)
    pub writable: bool,
}

impl From<&Event> for Ready {
    fn from(event: &Event) -> Self {
        Ready {
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed() || event.is_error(),
        }
    }
}

/// Token allocator and dispatch table
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<Token, Handler>,
    next: usize,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create a table holding the fixed tokens
    pub fn new() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(LISTENER, Handler::Listener);
        handlers.insert(RESOLVER, Handler::Resolver);
        handlers.insert(WAKER, Handler::Waker);
        HandlerRegistry {
            handlers,
            next: FIRST_DYNAMIC,
        }
    }

    /// Allocate a fresh token for `handler`
    pub fn insert(&mut self, handler: Handler) -> Token {
        loop {
            let token = Token(self.next);
            self.next = if self.next >= LAST_DYNAMIC {
                FIRST_DYNAMIC
            } else {
                self.next + 1
            };
            if !self.handlers.contains_key(&token) {
                self.handlers.insert(token, handler);
                return token;
            }
        }
    }

    /// Look up the handler for `token`
    pub fn get(&self, token: Token) -> Option<Handler> {
        self.handlers.get(&token).copied()
    }

    /// Release `token`; fixed tokens are never released
    pub fn remove(&mut self, token: Token) -> Option<Handler> {
        if token.0 < FIRST_DYNAMIC {
            return None;
        }
        self.handlers.remove(&token)
    }

    /// Number of dynamically allocated tokens
    pub fn active(&self) -> usize {
        self.handlers.len() - FIRST_DYNAMIC
    }
}

/// Reactor state a connection may touch while handling an event
pub struct Context<'a> {
    /// Poller registry
    pub registry: &'a Registry,
    /// Token table
    pub handlers: &'a mut HandlerRegistry,
    /// Embedded resolver
    pub resolver: &'a mut Resolver,
}
