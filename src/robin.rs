//! The circular array backing a single (archive, source) pair: a fixed-length double array
//! plus a rotating write pointer naming the oldest (and next-to-be-overwritten) slot (§4.6).

use std::sync::Arc;

use crate::backend::ByteBackend;
use crate::error::Result;
use crate::primitives::{DoubleArray, Int, SlotAllocator};

pub struct Robin {
    pointer: Int,
    values: DoubleArray,
    rows: usize,
}

impl Robin {
    pub(crate) fn allocate(alloc: &mut SlotAllocator, backend: Arc<dyn ByteBackend>, rows: usize) -> (Self, u64) {
        let start = alloc.position();
        let pointer = Int::new(backend.clone(), alloc.allocate(Int::SIZE), true);
        let values_offset = alloc.allocate(DoubleArray::size_bytes(rows));
        let values = DoubleArray::new(backend, values_offset, rows);
        (Self { pointer, values, rows }, alloc.position() - start)
    }

    pub(crate) fn init(&self) -> Result<()> {
        self.pointer.set(0)?;
        self.values.set_range(0, self.rows, f64::NAN)
    }

    /// Loads oldest-to-newest values supplied by a [`crate::importer::Importer`], resetting
    /// the pointer to 0. Fewer than `rows` values are padded with `NaN` on the newest end;
    /// more are truncated to the oldest `rows`.
    pub(crate) fn load(&self, values: &[f64]) -> Result<()> {
        self.pointer.set(0)?;
        for (i, &v) in values.iter().take(self.rows).enumerate() {
            self.values.set(i, v)?;
        }
        for i in values.len().min(self.rows)..self.rows {
            self.values.set(i, f64::NAN)?;
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn pointer(&self) -> Result<usize> {
        Ok(self.pointer.get()? as usize)
    }

    /// Writes `v` at the current pointer and advances it by one slot.
    pub(crate) fn store(&self, v: f64) -> Result<()> {
        let p = self.pointer()?;
        self.values.set(p, v)?;
        self.pointer.set(((p + 1) % self.rows) as i32)
    }

    /// Writes `v` into the next `b` slots starting at the pointer, wrapping at most once.
    pub(crate) fn bulk_store(&self, v: f64, b: usize) -> Result<()> {
        if b == 0 {
            return Ok(());
        }
        if b >= self.rows {
            self.values.set_range(0, self.rows, v)?;
            return self.pointer.set(self.pointer()? as i32);
        }
        let p = self.pointer()?;
        let tail = self.rows - p;
        if b <= tail {
            self.values.set_range(p, b, v)?;
        } else {
            self.values.set_range(p, tail, v)?;
            self.values.set_range(0, b - tail, v)?;
        }
        self.pointer.set(((p + b) % self.rows) as i32)
    }

    /// Returns the `i`-th value from the oldest, i.e. the logical index `(pointer + i) mod rows`.
    pub fn get_value(&self, i: usize) -> Result<f64> {
        let p = self.pointer()?;
        self.values.get((p + i) % self.rows)
    }

    /// Reports whether the `i`-th value from the oldest is the `NaN` "unknown" marker,
    /// using the same indexing as [`Robin::get_value`].
    pub fn is_empty_at(&self, i: usize) -> Result<bool> {
        Ok(self.get_value(i)?.is_nan())
    }

    pub fn set_value(&self, i: usize, v: f64) -> Result<()> {
        let p = self.pointer()?;
        self.values.set((p + i) % self.rows, v)
    }

    /// Returns `count` logically contiguous values starting at logical index `i`, oldest to
    /// newest, assembled from at most two physical slices.
    pub fn get_values(&self, i: usize, count: usize) -> Result<Vec<f64>> {
        let p = self.pointer()?;
        let start = (p + i) % self.rows;
        let tail = self.rows - start;
        if count <= tail {
            self.values.get_range(start, count)
        } else {
            let mut out = self.values.get_range(start, tail)?;
            out.extend(self.values.get_range(0, count - tail)?);
            Ok(out)
        }
    }

    /// Replaces every stored value not within `[lo, hi]` with NaN. NaN-safe: a stored NaN is
    /// always left alone regardless of the bounds.
    pub(crate) fn filter_values(&self, lo: f64, hi: f64) -> Result<()> {
        for idx in 0..self.rows {
            let v = self.values.get(idx)?;
            if !v.is_nan() && (v < lo || v > hi) {
                self.values.set(idx, f64::NAN)?;
            }
        }
        Ok(())
    }

    /// Copies this Robin's contents into `other`. When sizes match, copies the pointer and
    /// raw values verbatim. Otherwise aligns by the newest end, preserving the most recent
    /// `min(rows, other.rows)` values and padding the older side of `other` with NaN.
    pub(crate) fn copy_state_to(&self, other: &Robin) -> Result<()> {
        if self.rows == other.rows {
            let vals = self.get_values(0, self.rows)?;
            for (idx, v) in vals.into_iter().enumerate() {
                other.values.set(idx, v)?;
            }
            other.pointer.set(self.pointer()? as i32)?;
            return Ok(());
        }

        let keep = self.rows.min(other.rows);
        let newest = self.get_values(self.rows - keep, keep)?;
        let pad = other.rows - keep;
        other.values.set_range(0, pad, f64::NAN)?;
        for (idx, v) in newest.into_iter().enumerate() {
            other.values.set(pad + idx, v)?;
        }
        other.pointer.set(0)
    }
}
