//! Overflow storage for request bodies larger than the parse buffer.
//!
//! The parser never touches the filesystem directly. It asks an injected
//! [`SpoolFactory`] for an [`OverflowSink`] and streams body bytes into
//! it, so the same parser works with in-memory or disk-backed overflow.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::PathBuf;

/// Write/read/rewind storage holding one spooled body.
pub trait OverflowSink: Send + fmt::Debug {
    /// Appends `data` to the sink.
    ///
    /// # Errors
    ///
    /// Returns the underlying storage error.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Reads from the current position into `buf`, returning the number of
    /// bytes read (0 at the end).
    ///
    /// # Errors
    ///
    /// Returns the underlying storage error.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Moves the read position back to the start.
    ///
    /// # Errors
    ///
    /// Returns the underlying storage error.
    fn rewind(&mut self) -> io::Result<()>;

    /// Number of bytes written so far.
    fn len(&self) -> u64;

    /// Returns `true` if nothing has been written.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates a fresh [`OverflowSink`] per spooled body.
pub trait SpoolFactory: Send + Sync + fmt::Debug {
    /// Creates a sink expected to receive `expected_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be allocated.
    fn create(&self, expected_len: u64) -> io::Result<Box<dyn OverflowSink>>;
}

/// Sink backed by a growable in-memory buffer.
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Cursor<Vec<u8>>,
}

impl MemorySink {
    /// Creates a sink with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Cursor::new(Vec::with_capacity(capacity)),
        }
    }
}

impl OverflowSink for MemorySink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.data.seek(io::SeekFrom::End(0))?;
        Write::write_all(&mut self.data, data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.data, buf)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.data.set_position(0);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.get_ref().len() as u64
    }
}

/// Sink backed by an anonymous temporary file, removed when dropped.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    len: u64,
}

impl FileSink {
    /// Wraps an already opened, empty file.
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { file, len: 0 }
    }
}

impl OverflowSink for FileSink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.seek(io::SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.len = self.len.saturating_add(data.len() as u64);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.rewind()
    }

    fn len(&self) -> u64 {
        self.len
    }
}

/// Spools bodies into memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySpool;

impl SpoolFactory for MemorySpool {
    fn create(&self, expected_len: u64) -> io::Result<Box<dyn OverflowSink>> {
        let capacity = usize::try_from(expected_len).map_err(|_| {
            io::Error::new(io::ErrorKind::OutOfMemory, "body does not fit in memory")
        })?;
        Ok(Box::new(MemorySink::with_capacity(capacity)))
    }
}

/// Spools bodies into anonymous temp files.
#[derive(Debug, Default, Clone)]
pub struct TempFileSpool {
    dir: Option<PathBuf>,
}

impl TempFileSpool {
    /// Creates temp files in `dir`, or the system temp dir when `None`.
    #[must_use]
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

impl SpoolFactory for TempFileSpool {
    fn create(&self, _expected_len: u64) -> io::Result<Box<dyn OverflowSink>> {
        let file = match &self.dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Box::new(FileSink::new(file)))
    }
}

/// Drains a sink from its start into a vector.
///
/// # Errors
///
/// Returns the underlying storage error.
pub fn read_to_vec(sink: &mut dyn OverflowSink) -> io::Result<Vec<u8>> {
    sink.rewind()?;
    let mut out = Vec::with_capacity(usize::try_from(sink.len()).unwrap_or(0));
    let mut chunk = [0u8; 8192];
    loop {
        let n = sink.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(chunk.get(..n).unwrap_or_default());
    }
    Ok(out)
}
