//! Fixed-capacity relay buffers
//!
//! One [`RelayBuffer`] exists per tunnel direction. The reading leg fills it,
//! the writing leg drains it, and the capacity never grows, which is what
//! bounds per-connection memory regardless of peer speed.

use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};

/// Result of a fill pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillOutcome {
    /// Bytes appended during this pass
    pub read: usize,
    /// The source reported end-of-stream
    pub eof: bool,
}

/// A byte queue with a hard capacity
#[derive(Debug)]
pub struct RelayBuffer {
    data: BytesMut,
    capacity: usize,
}

impl RelayBuffer {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes queued and not yet written
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether no more bytes can be accepted
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Maximum number of queued bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queued bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Queue bytes produced locally (handshake replies)
    ///
    /// Returns the number of bytes accepted, which is less than `bytes.len()`
    /// only if the buffer is full.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.capacity - self.data.len());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    /// Read from `source` until it would block, reports end-of-stream, or the
    /// buffer is full
    pub fn fill_from<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<FillOutcome> {
        let mut outcome = FillOutcome::default();

        while !self.is_full() {
            let start = self.data.len();
            self.data.resize(self.capacity, 0);

            match source.read(&mut self.data[start..]) {
                Ok(0) => {
                    self.data.truncate(start);
                    outcome.eof = true;
                    break;
                }
                Ok(n) => {
                    self.data.truncate(start + n);
                    outcome.read += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.data.truncate(start);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.data.truncate(start);
                }
                Err(e) => {
                    self.data.truncate(start);
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }

    /// Write queued bytes to `sink` until it would block or the buffer is
    /// empty; returns the number of bytes written
    pub fn drain_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<usize> {
        let mut written = 0;

        while !self.data.is_empty() {
            match sink.write(&self.data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.data.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        if self.data.is_empty() {
            self.data.clear();
        }
        Ok(written)
    }
}
