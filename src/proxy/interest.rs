//! Interest-set bookkeeping
//!
//! mio has no empty interest set, so "interested in nothing" is expressed by
//! deregistering. [`Readiness`] tracks the wanted read/write bits plus the
//! interest last pushed to the poller, and turns every change into the
//! right register / reregister / deregister call. Reregistering re-evaluates
//! readiness, which is what makes re-arming safe under edge-triggered polling;
//! an unchanged interest is not pushed again.

use mio::event::Source;
use mio::{Interest, Registry, Token};
use std::io;

/// Wanted readiness for one registered source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    read: bool,
    write: bool,
    applied: Option<Interest>,
}

impl Readiness {
    /// Set read interest
    pub fn read(&mut self, on: bool) -> &mut Self {
        self.read = on;
        self
    }

    /// Set write interest
    pub fn write(&mut self, on: bool) -> &mut Self {
        self.write = on;
        self
    }

    /// Drop both interests
    pub fn none(&mut self) -> &mut Self {
        self.read = false;
        self.write = false;
        self
    }

    /// Whether read interest is armed
    pub fn wants_read(&self) -> bool {
        self.read
    }

    /// Whether write interest is armed
    #[cfg(test)]
    pub fn wants_write(&self) -> bool {
        self.write
    }

    /// Whether the source is currently known to the poller
    #[cfg(test)]
    pub fn is_registered(&self) -> bool {
        self.applied.is_some()
    }

    /// The mio interest matching the wanted bits, `None` for "nothing"
    pub fn interest(&self) -> Option<Interest> {
        match (self.read, self.write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Push the wanted interest to the poller
    pub fn apply<S>(&mut self, registry: &Registry, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        let wanted = self.interest();
        match (wanted, self.applied) {
            (Some(interest), None) => registry.register(source, token, interest)?,
            (Some(interest), Some(current)) if interest != current => {
                registry.reregister(source, token, interest)?
            }
            (Some(_), Some(_)) => return Ok(()),
            (None, Some(_)) => registry.deregister(source)?,
            (None, None) => return Ok(()),
        }
        self.applied = wanted;
        Ok(())
    }

    /// Deregister if registered and forget all interest
    pub fn release<S>(&mut self, registry: &Registry, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.none();
        if self.applied.take().is_some() {
            registry.deregister(source)?;
        }
        Ok(())
    }
}
