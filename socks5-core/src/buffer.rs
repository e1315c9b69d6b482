//! Fixed-capacity, non-blocking-friendly read/write buffers.
//!
//! Mirrors the ingress/egress split of a classic reactor buffer, but backed by a plain
//! `[u8; CAPACITY]` instead of a growable deque: the handshake never needs more than a
//! bounded amount of bytes in flight in either direction, so a fixed array keeps the
//! per-connection footprint predictable and avoids an allocation per connection.

use std::io::{self, Read, Write};

/// Matches the data model's `recv_buf`/`send_buf` sizing.
pub const CAPACITY: usize = 8192;

/// Outcome of a partial, non-blocking I/O attempt against a buffer.
#[derive(Debug, Eq, PartialEq)]
pub enum DrainOutcome {
    /// Some progress was made; the caller should keep going if interest remains.
    Progress(usize),
    /// The underlying fd would block; park until the next readiness notification.
    WouldBlock,
    /// The peer closed its end (read side only, zero-length read).
    Eof,
}

/// Accumulates bytes read off the wire until a parser can make sense of them.
pub struct RecvBuffer {
    data: [u8; CAPACITY],
    len: usize,
}

impl RecvBuffer {
    pub fn new() -> Self {
        RecvBuffer { data: [0u8; CAPACITY], len: 0 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == CAPACITY
    }

    /// Drops the first `n` bytes, shifting the remainder down. Used once a parser has
    /// consumed a complete message and the leftover bytes (if any) belong to the next one.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len);
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Reads as much as the underlying source will yield without blocking, appending into
    /// the free tail of the buffer. Loops until `WouldBlock`, EOF, or the buffer fills, the
    /// standard drain-to-EAGAIN discipline for edge-triggered readiness.
    pub fn ingress<R: Read>(&mut self, src: &mut R) -> io::Result<DrainOutcome> {
        let mut total = 0usize;
        loop {
            if self.len == CAPACITY {
                return Ok(DrainOutcome::Progress(total));
            }
            match src.read(&mut self.data[self.len..]) {
                Ok(0) => {
                    return Ok(if total > 0 { DrainOutcome::Progress(total) } else { DrainOutcome::Eof });
                }
                Ok(n) => {
                    self.len += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if total > 0 { DrainOutcome::Progress(total) } else { DrainOutcome::WouldBlock });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Queues bytes destined for the wire until the fd is ready to accept them.
pub struct SendBuffer {
    data: [u8; CAPACITY],
    len: usize,
    sent: usize,
}

impl SendBuffer {
    pub fn new() -> Self {
        SendBuffer { data: [0u8; CAPACITY], len: 0, sent: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.sent == self.len
    }

    pub fn remaining_capacity(&self) -> usize {
        CAPACITY - self.len
    }

    /// Appends `bytes` to the queue. Fails if the bounded buffer cannot hold them.
    pub fn enqueue(&mut self, bytes: &[u8]) -> Result<(), ()> {
        if bytes.len() > self.remaining_capacity() {
            return Err(());
        }
        let start = self.len;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Writes as much of the queued tail as the sink will accept without blocking.
    pub fn egress<W: Write>(&mut self, sink: &mut W) -> io::Result<DrainOutcome> {
        let mut total = 0usize;
        loop {
            if self.sent == self.len {
                self.sent = 0;
                self.len = 0;
                return Ok(DrainOutcome::Progress(total));
            }
            match sink.write(&self.data[self.sent..self.len]) {
                Ok(0) => return Ok(DrainOutcome::Progress(total)),
                Ok(n) => {
                    self.sent += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if total > 0 { DrainOutcome::Progress(total) } else { DrainOutcome::WouldBlock });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for SendBuffer {
    fn default() -> Self {
        Self::new()
    }
}
