//! Typed, offset-bound views over a [`ByteBackend`], and the monotonic allocator that hands
//! out the offsets they're built from.
//!
//! Rather than modeling each scalar field as a heap object with a back-reference to its
//! owning database (the shape that a naive, object-graph-preserving port would produce),
//! every primitive here is a small value carrying only `(offset, backend handle)`, built
//! from an offset table computed once, deterministically, from the database definition.
//! This keeps the object graph acyclic: sources and archives borrow the backend, they never
//! own or reach back through it.

use std::sync::Arc;

use byteorder::{ByteOrder, BigEndian};
use parking_lot::Mutex;

use crate::backend::ByteBackend;
use crate::error::Result;

/// STRLEN: the fixed width, in UCS-2 code units, of every string field in the on-disk
/// layout (§6).
pub const STRLEN: usize = 20;

/// A monotonic byte-offset counter used while laying out a new database. `allocate(n)`
/// returns the current offset and advances the counter by `n`.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    next: u64,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn allocate(&mut self, n: u64) -> u64 {
        let offset = self.next;
        self.next += n;
        offset
    }

    pub fn position(&self) -> u64 {
        self.next
    }
}

type Backend = Arc<dyn ByteBackend>;

/// A 32-bit signed integer bound to a byte offset.
#[derive(Clone)]
pub struct Int {
    backend: Backend,
    offset: u64,
    cache: Arc<Mutex<Option<i32>>>,
    cacheable: bool,
}

impl Int {
    pub const SIZE: u64 = 4;

    pub fn new(backend: Backend, offset: u64, cacheable: bool) -> Self {
        let cacheable = cacheable && backend.caching_allowed();
        Self {
            backend,
            offset,
            cache: Arc::new(Mutex::new(None)),
            cacheable,
        }
    }

    pub fn get(&self) -> Result<i32> {
        if self.cacheable {
            if let Some(v) = *self.cache.lock() {
                return Ok(v);
            }
        }
        let mut buf = [0u8; 4];
        self.backend.read(self.offset, &mut buf)?;
        let v = BigEndian::read_i32(&buf);
        if self.cacheable {
            *self.cache.lock() = Some(v);
        }
        Ok(v)
    }

    pub fn set(&self, value: i32) -> Result<()> {
        if self.cacheable {
            let mut cache = self.cache.lock();
            if *cache == Some(value) {
                return Ok(());
            }
            *cache = Some(value);
        }
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.backend.write(self.offset, &buf)
    }
}

/// A 64-bit signed integer bound to a byte offset.
#[derive(Clone)]
pub struct Long {
    backend: Backend,
    offset: u64,
    cache: Arc<Mutex<Option<i64>>>,
    cacheable: bool,
}

impl Long {
    pub const SIZE: u64 = 8;

    pub fn new(backend: Backend, offset: u64, cacheable: bool) -> Self {
        let cacheable = cacheable && backend.caching_allowed();
        Self {
            backend,
            offset,
            cache: Arc::new(Mutex::new(None)),
            cacheable,
        }
    }

    pub fn get(&self) -> Result<i64> {
        if self.cacheable {
            if let Some(v) = *self.cache.lock() {
                return Ok(v);
            }
        }
        let mut buf = [0u8; 8];
        self.backend.read(self.offset, &mut buf)?;
        let v = BigEndian::read_i64(&buf);
        if self.cacheable {
            *self.cache.lock() = Some(v);
        }
        Ok(v)
    }

    pub fn set(&self, value: i64) -> Result<()> {
        if self.cacheable {
            let mut cache = self.cache.lock();
            if *cache == Some(value) {
                return Ok(());
            }
            *cache = Some(value);
        }
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        self.backend.write(self.offset, &buf)
    }
}

/// An IEEE-754 64-bit float bound to a byte offset.
#[derive(Clone)]
pub struct Double {
    backend: Backend,
    offset: u64,
    cache: Arc<Mutex<Option<u64>>>,
    cacheable: bool,
}

impl Double {
    pub const SIZE: u64 = 8;

    pub fn new(backend: Backend, offset: u64, cacheable: bool) -> Self {
        let cacheable = cacheable && backend.caching_allowed();
        Self {
            backend,
            offset,
            cache: Arc::new(Mutex::new(None)),
            cacheable,
        }
    }

    pub fn get(&self) -> Result<f64> {
        if self.cacheable {
            if let Some(bits) = *self.cache.lock() {
                return Ok(f64::from_bits(bits));
            }
        }
        let mut buf = [0u8; 8];
        self.backend.read(self.offset, &mut buf)?;
        let bits = BigEndian::read_u64(&buf);
        if self.cacheable {
            *self.cache.lock() = Some(bits);
        }
        Ok(f64::from_bits(bits))
    }

    pub fn set(&self, value: f64) -> Result<()> {
        let bits = value.to_bits();
        if self.cacheable {
            let mut cache = self.cache.lock();
            // Bit-exact comparison: NaN payloads and signed zero must round-trip exactly,
            // since unknown-ness is carried by NaN throughout the engine.
            if *cache == Some(bits) {
                return Ok(());
            }
            *cache = Some(bits);
        }
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, bits);
        self.backend.write(self.offset, &buf)
    }
}

/// A fixed STRLEN-wide, right-space-padded UCS-2 string bound to a byte offset.
#[derive(Clone)]
pub struct Str {
    backend: Backend,
    offset: u64,
    cache: Arc<Mutex<Option<String>>>,
    cacheable: bool,
}

impl Str {
    pub const SIZE: u64 = (STRLEN * 2) as u64;

    pub fn new(backend: Backend, offset: u64, cacheable: bool) -> Self {
        let cacheable = cacheable && backend.caching_allowed();
        Self {
            backend,
            offset,
            cache: Arc::new(Mutex::new(None)),
            cacheable,
        }
    }

    pub fn get(&self) -> Result<String> {
        if self.cacheable {
            if let Some(v) = self.cache.lock().clone() {
                return Ok(v);
            }
        }
        let mut buf = vec![0u8; Self::SIZE as usize];
        self.backend.read(self.offset, &mut buf)?;
        let mut units = vec![0u16; STRLEN];
        BigEndian::read_u16_into(&buf, &mut units);
        let s: String = char::decode_utf16(units)
            .map(|r| r.unwrap_or('\u{FFFD}'))
            .collect::<String>()
            .trim_end_matches(' ')
            .to_string();
        if self.cacheable {
            *self.cache.lock() = Some(s.clone());
        }
        Ok(s)
    }

    pub fn set(&self, value: &str) -> Result<()> {
        if self.cacheable {
            let mut cache = self.cache.lock();
            if cache.as_deref() == Some(value) {
                return Ok(());
            }
            *cache = Some(value.to_string());
        }
        let mut units: Vec<u16> = value.encode_utf16().collect();
        units.resize(STRLEN, b' ' as u16);
        units.truncate(STRLEN);
        let mut buf = vec![0u8; Self::SIZE as usize];
        BigEndian::write_u16_into(&units, &mut buf);
        self.backend.write(self.offset, &buf)
    }
}

/// A fixed-length array of doubles bound to a byte offset, used by [`crate::robin::Robin`].
#[derive(Clone)]
pub struct DoubleArray {
    backend: Backend,
    offset: u64,
    len: usize,
}

impl DoubleArray {
    pub fn new(backend: Backend, offset: u64, len: usize) -> Self {
        Self {
            backend,
            offset,
            len,
        }
    }

    pub fn size_bytes(len: usize) -> u64 {
        (len as u64) * 8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.backend.read(self.offset + (index as u64) * 8, &mut buf)?;
        Ok(f64::from_bits(BigEndian::read_u64(&buf)))
    }

    pub fn set(&self, index: usize, value: f64) -> Result<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value.to_bits());
        self.backend.write(self.offset + (index as u64) * 8, &buf)
    }

    /// Reads a contiguous run of `count` values starting at `index`.
    pub fn get_range(&self, index: usize, count: usize) -> Result<Vec<f64>> {
        let mut raw = vec![0u8; count * 8];
        self.backend.read(self.offset + (index as u64) * 8, &mut raw)?;
        let mut out = vec![0u64; count];
        BigEndian::read_u64_into(&raw, &mut out);
        Ok(out.into_iter().map(f64::from_bits).collect())
    }

    /// Writes `value` into `count` consecutive slots starting at `index`, in one call.
    pub fn set_range(&self, index: usize, count: usize, value: f64) -> Result<()> {
        let mut raw = vec![0u8; count * 8];
        let bits = value.to_bits();
        for chunk in raw.chunks_exact_mut(8) {
            BigEndian::write_u64(chunk, bits);
        }
        self.backend.write(self.offset + (index as u64) * 8, &raw)
    }
}
