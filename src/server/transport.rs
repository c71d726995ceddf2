//! [`Transport`] over a tokio [`TcpStream`].
//!
//! Reads use `try_read` so the synchronous connection code never blocks;
//! the owning task waits on [`TokioTransport::readable`] between calls.
//! Writes are buffered and pushed out by [`TokioTransport::flush`] after
//! each round of processing.

use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::transport::{ReadOutcome, Transport};

/// Non-blocking TCP transport with a write buffer.
#[derive(Debug)]
pub struct TokioTransport {
    stream: TcpStream,
    pending: Vec<u8>,
    closed: bool,
}

impl TokioTransport {
    /// Wraps an accepted stream.
    #[must_use]
    pub const fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Waits until the socket may have data.
    ///
    /// # Errors
    ///
    /// Returns the socket error, if any.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    /// Writes out everything queued by [`Transport::write`].
    ///
    /// # Errors
    ///
    /// Returns the socket error if the peer is gone.
    pub async fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.pending).await?;
        self.pending.clear();
        Ok(())
    }

    /// Returns `true` once [`Transport::close`] was called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flushes and shuts down the write half.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.flush().await {
            tracing::trace!(error = %e, "flush on shutdown failed");
        }
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(error = %e, "socket shutdown failed");
        }
    }
}

impl Transport for TokioTransport {
    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self.stream.try_read(buf) {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(e) => ReadOutcome::Error(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"));
        }
        self.pending.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
