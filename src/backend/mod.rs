//! Byte backends: fixed-length, random-access storage of the database's raw bytes.
//!
//! A backend's length is set exactly once, at creation (see [`ByteBackend::set_length`]),
//! and never changes afterwards -- the whole point of the on-disk layout (§6) is that it
//! never grows. Two implementations are provided: [`file::FileBackend`], which owns a real
//! file plus an advisory sidecar lock, and [`memory::MemoryBackend`], a reader/writer-locked
//! byte vector used for tests and ephemeral databases.

pub mod file;
pub mod memory;

use crate::error::Result;

/// Fixed-length random-access storage of raw bytes.
///
/// Offsets passed to [`read`](ByteBackend::read)/[`write`](ByteBackend::write) that fall
/// outside `[0, length())` are a programming error in this crate (every offset is derived
/// from the deterministic layout built by [`crate::primitives::SlotAllocator`]) and are
/// enforced with a debug assertion rather than a recoverable error.
pub trait ByteBackend: Send + Sync {
    /// Reads `buf.len()` bytes starting at `offset`. Fails with `RrdError::Io` wrapping an
    /// `UnexpectedEof` if fewer bytes are available.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` starting at `offset`. Writing past `length()` is forbidden.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// The fixed length of this backend, in bytes.
    fn length(&self) -> u64;

    /// Sets the fixed length of this backend. Invoked exactly once, at creation.
    fn set_length(&self, n: u64) -> Result<()>;

    /// Releases any resources (file handles, locks) held by this backend.
    fn close(&self) -> Result<()>;

    /// Whether primitives bound to this backend may cache reads of fields declared
    /// immutable at construction.
    fn caching_allowed(&self) -> bool;
}

pub(crate) fn check_bounds(offset: u64, len: usize, total: u64) {
    debug_assert!(
        offset.saturating_add(len as u64) <= total,
        "backend access out of bounds: offset={offset} len={len} total={total}"
    );
}
