//! The database's fixed metadata block: signature, primary step, source/archive counts,
//! and the last-update timestamp.

use std::sync::Arc;

use crate::backend::ByteBackend;
use crate::error::{InvalidFormatSnafu, Result};
use crate::primitives::{Int, Long, SlotAllocator, Str};
use snafu::ensure;

/// Fixed signature prefix every database's header must begin with.
pub const SIGNATURE_PREFIX: &str = "JRobin, ";

#[derive(Clone)]
pub struct Header {
    signature: Str,
    step: Long,
    ds_count: Int,
    arc_count: Int,
    last_update: Long,
}

impl Header {
    /// Allocates the header's fields and returns both the header and its fixed byte size.
    pub(crate) fn allocate(alloc: &mut SlotAllocator, backend: Arc<dyn ByteBackend>) -> (Self, u64) {
        let start = alloc.position();
        let signature = Str::new(backend.clone(), alloc.allocate(Str::SIZE), true);
        let step = Long::new(backend.clone(), alloc.allocate(Long::SIZE), true);
        let ds_count = Int::new(backend.clone(), alloc.allocate(Int::SIZE), true);
        let arc_count = Int::new(backend.clone(), alloc.allocate(Int::SIZE), true);
        let last_update = Long::new(backend, alloc.allocate(Long::SIZE), false);
        let header = Self {
            signature,
            step,
            ds_count,
            arc_count,
            last_update,
        };
        (header, alloc.position() - start)
    }

    pub(crate) fn init(&self, info: &str, step: i64, ds_count: i32, arc_count: i32, start_time: i64) -> Result<()> {
        self.signature.set(&format!("{SIGNATURE_PREFIX}{info}"))?;
        self.step.set(step)?;
        self.ds_count.set(ds_count)?;
        self.arc_count.set(arc_count)?;
        self.last_update.set(start_time)?;
        Ok(())
    }

    /// Validates that an opened database's signature begins with [`SIGNATURE_PREFIX`].
    pub(crate) fn validate_signature(&self) -> Result<()> {
        let sig = self.signature.get()?;
        ensure!(
            sig.starts_with(SIGNATURE_PREFIX),
            InvalidFormatSnafu {
                reason: format!("signature '{sig}' does not start with '{SIGNATURE_PREFIX}'"),
            }
        );
        Ok(())
    }

    pub fn step(&self) -> Result<i64> {
        self.step.get()
    }

    pub fn ds_count(&self) -> Result<i32> {
        self.ds_count.get()
    }

    pub fn arc_count(&self) -> Result<i32> {
        self.arc_count.get()
    }

    pub fn last_update(&self) -> Result<i64> {
        self.last_update.get()
    }

    pub(crate) fn set_last_update(&self, t: i64) -> Result<()> {
        self.last_update.set(t)
    }

    pub(crate) fn signature_raw(&self) -> Result<String> {
        self.signature.get()
    }

    pub(crate) fn copy_state_from(&self, other: &Header) -> Result<()> {
        self.signature.set(&other.signature_raw()?)?;
        self.last_update.set(other.last_update()?)?;
        Ok(())
    }
}
