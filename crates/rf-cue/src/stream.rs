//! Wave Data Sources
//!
//! A wave bank's data region is either preloaded into memory or read on
//! demand through a [`StreamReader`]. Readers must not block: a reader that
//! has no data ready yet returns `ErrorKind::WouldBlock`, the wave under-runs
//! (plays silence) and the read is retried on the next tick.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// Byte-range reader over a wave bank's data region
pub trait StreamReader: Send {
    /// Read up to `buf.len()` bytes at `offset`. `Ok(0)` means end of data.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length if known
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// [`StreamReader`] over any `Read + Seek` source (files, cursors)
#[derive(Debug)]
pub struct SeekReader<R> {
    inner: R,
}

impl<R: Read + Seek + Send> SeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek + Send> StreamReader for SeekReader<R> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Backing data of a loaded wave bank
pub enum WaveData {
    /// Whole data region in memory
    Memory(Arc<[u8]>),
    /// Read on demand
    Stream(Box<dyn StreamReader>),
}

impl WaveData {
    pub fn memory(bytes: impl Into<Arc<[u8]>>) -> Self {
        WaveData::Memory(bytes.into())
    }

    pub fn stream(reader: impl StreamReader + 'static) -> Self {
        WaveData::Stream(Box::new(reader))
    }

    #[inline]
    pub fn is_streaming(&self) -> bool {
        matches!(self, WaveData::Stream(_))
    }

    /// Data length if known
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            WaveData::Memory(bytes) => Some(bytes.len() as u64),
            WaveData::Stream(reader) => reader.len_hint(),
        }
    }
}

impl std::fmt::Debug for WaveData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaveData::Memory(bytes) => write!(f, "WaveData::Memory({} bytes)", bytes.len()),
            WaveData::Stream(_) => write!(f, "WaveData::Stream"),
        }
    }
}
