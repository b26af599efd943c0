//! An in-memory [`ByteBackend`], suitable for tests and for databases that never need to
//! survive process restart. A single reader/writer lock guards the whole buffer, with a
//! bounded wait matching §5's "reader/writer lock acquisition on the in-memory backend"
//! suspension point.

use std::io;
use std::time::Duration;

use parking_lot::RwLock;

use super::{check_bounds, ByteBackend};
use crate::error::{IoSnafu, Result};
use snafu::ResultExt;

const LOCK_WAIT: Duration = Duration::from_secs(1);

pub struct MemoryBackend {
    buf: RwLock<Vec<u8>>,
}

impl MemoryBackend {
    /// Creates a backend of exactly `length` zero-filled bytes.
    pub fn new(length: u64) -> Self {
        Self {
            buf: RwLock::new(vec![0u8; length as usize]),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(0)
    }
}

fn lock_timeout() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for buffer lock")
}

impl ByteBackend for MemoryBackend {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let guard = self
            .buf
            .try_read_for(LOCK_WAIT)
            .ok_or_else(lock_timeout)
            .context(IoSnafu)?;
        check_bounds(offset, buf.len(), guard.len() as u64);
        let start = offset as usize;
        buf.copy_from_slice(&guard[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut guard = self
            .buf
            .try_write_for(LOCK_WAIT)
            .ok_or_else(lock_timeout)
            .context(IoSnafu)?;
        check_bounds(offset, data.len(), guard.len() as u64);
        let start = offset as usize;
        guard[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn length(&self) -> u64 {
        self.buf.read().len() as u64
    }

    fn set_length(&self, n: u64) -> Result<()> {
        self.buf.write().resize(n as usize, 0);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn caching_allowed(&self) -> bool {
        true
    }
}
