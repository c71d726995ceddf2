//! Byte transport primitives supplied by the host reactor.
//!
//! A [`Transport`] is non-blocking: `read` reports
//! [`ReadOutcome::WouldBlock`] when no data is available yet, and the
//! connection is driven again on the next readiness notification.

use std::collections::VecDeque;
use std::io;

/// Result of a single non-blocking read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The peer closed its side.
    Eof,
    /// The read failed.
    Error(io::Error),
}

/// Host-side socket operations used by [`crate::connection::Connection`].
pub trait Transport {
    /// Reads into `buf` without blocking.
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome;

    /// Queues `data` for the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport can no longer accept data.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Closes the connection once queued data is flushed.
    fn close(&mut self);
}

/// In-memory transport: scripted inbound chunks, captured outbound bytes.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<Vec<u8>>,
    eof: bool,
    /// Everything written so far.
    pub written: Vec<u8>,
    closed: bool,
}

impl MemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a chunk for the next `read`.
    pub fn push_inbound(&mut self, chunk: impl Into<Vec<u8>>) {
        self.inbound.push_back(chunk.into());
    }

    /// Makes `read` report [`ReadOutcome::Eof`] once inbound data runs out.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Returns `true` once [`Transport::close`] was called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Takes the written bytes, leaving the buffer empty.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let Some(mut chunk) = self.inbound.pop_front() else {
            return if self.eof {
                ReadOutcome::Eof
            } else {
                ReadOutcome::WouldBlock
            };
        };
        let n = chunk.len().min(buf.len());
        let rest = chunk.split_off(n);
        if let Some(dst) = buf.get_mut(..n) {
            dst.copy_from_slice(&chunk);
        }
        if !rest.is_empty() {
            self.inbound.push_front(rest);
        }
        ReadOutcome::Data(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_chunks_in_order_and_splits_large_ones() {
        let mut t = MemoryTransport::new();
        t.push_inbound(b"hello world".to_vec());
        t.push_inbound(b"!".to_vec());

        let mut buf = [0u8; 5];
        assert!(matches!(t.read(&mut buf), ReadOutcome::Data(5)));
        assert_eq!(&buf, b"hello");
        assert!(matches!(t.read(&mut buf), ReadOutcome::Data(5)));
        assert_eq!(&buf, b" worl");
        assert!(matches!(t.read(&mut buf), ReadOutcome::Data(1)));
        assert!(matches!(t.read(&mut buf), ReadOutcome::Data(1)));
        assert!(matches!(t.read(&mut buf), ReadOutcome::WouldBlock));
        t.set_eof();
        assert!(matches!(t.read(&mut buf), ReadOutcome::Eof));
    }

    #[test]
    fn write_after_close_fails() {
        let mut t = MemoryTransport::new();
        assert!(t.write(b"a").is_ok());
        t.close();
        assert!(t.is_closed());
        assert!(t.write(b"b").is_err());
        assert_eq!(t.take_written(), b"a".to_vec());
    }
}
