//! Archive definitions, per-(archive, source) CDP accumulator state, and the CDP pipeline
//! that folds primary data points into completed archive rows (§3, §4.5).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::ByteBackend;
use crate::error::{InvalidDefinitionSnafu, Result};
use crate::primitives::{Double, Int, SlotAllocator, Str};
use crate::robin::Robin;
use crate::util::{nan_safe_max, nan_safe_min, nan_safe_sum};
use snafu::ensure;

/// The four consolidation functions an archive may reduce primary data points with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConsolidationFunction {
    Average,
    Min,
    Max,
    Last,
}

impl fmt::Display for ConsolidationFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsolidationFunction::Average => "AVERAGE",
            ConsolidationFunction::Min => "MIN",
            ConsolidationFunction::Max => "MAX",
            ConsolidationFunction::Last => "LAST",
        };
        f.write_str(s)
    }
}

impl FromStr for ConsolidationFunction {
    type Err = crate::error::RrdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AVERAGE" => Ok(ConsolidationFunction::Average),
            "MIN" => Ok(ConsolidationFunction::Min),
            "MAX" => Ok(ConsolidationFunction::Max),
            "LAST" => Ok(ConsolidationFunction::Last),
            other => InvalidDefinitionSnafu {
                reason: format!("unrecognized consolidation function '{other}'"),
            }
            .fail(),
        }
    }
}

/// An archive definition, staged for [`crate::database::Database::create`].
#[derive(Debug, Clone)]
pub struct ArchiveDef {
    pub cf: ConsolidationFunction,
    pub xff: f64,
    pub steps: i32,
    pub rows: i32,
}

impl ArchiveDef {
    pub fn new(cf: ConsolidationFunction, xff: f64, steps: i32, rows: i32) -> Result<Self> {
        ensure!(
            (0.0..1.0).contains(&xff),
            InvalidDefinitionSnafu {
                reason: format!("xff must be in [0, 1), got {xff}"),
            }
        );
        ensure!(
            steps >= 1,
            InvalidDefinitionSnafu {
                reason: format!("steps must be >= 1, got {steps}"),
            }
        );
        ensure!(
            rows >= 2,
            InvalidDefinitionSnafu {
                reason: format!("rows must be >= 2, got {rows}"),
            }
        );
        Ok(Self {
            cf,
            xff,
            steps,
            rows,
        })
    }

    pub(crate) fn key(&self) -> (ConsolidationFunction, i32) {
        (self.cf, self.steps)
    }
}

/// The immutable definition fields of an archive, bound to the backend.
pub struct ArchiveHeader {
    cf: Str,
    xff: Double,
    steps: Int,
    rows: Int,
}

impl ArchiveHeader {
    pub(crate) fn allocate(alloc: &mut SlotAllocator, backend: Arc<dyn ByteBackend>) -> (Self, u64) {
        let start = alloc.position();
        let cf = Str::new(backend.clone(), alloc.allocate(Str::SIZE), true);
        let xff = Double::new(backend.clone(), alloc.allocate(Double::SIZE), true);
        let steps = Int::new(backend.clone(), alloc.allocate(Int::SIZE), true);
        let rows = Int::new(backend, alloc.allocate(Int::SIZE), true);
        (
            Self {
                cf,
                xff,
                steps,
                rows,
            },
            alloc.position() - start,
        )
    }

    pub(crate) fn init(&self, def: &ArchiveDef) -> Result<()> {
        self.cf.set(&def.cf.to_string())?;
        self.xff.set(def.xff)?;
        self.steps.set(def.steps)?;
        self.rows.set(def.rows)?;
        Ok(())
    }

    pub fn cf(&self) -> Result<ConsolidationFunction> {
        self.cf.get()?.parse()
    }

    pub fn xff(&self) -> Result<f64> {
        self.xff.get()
    }

    pub fn steps(&self) -> Result<i32> {
        self.steps.get()
    }

    pub fn rows(&self) -> Result<i32> {
        self.rows.get()
    }
}

/// Per-(archive, source) CDP accumulator: the partial consolidated value and the count of
/// NaN PDPs folded into the current, not-yet-finalized archive row.
pub struct ArcState {
    accumulated_value: Double,
    nan_steps: Int,
}

impl ArcState {
    pub(crate) fn allocate(alloc: &mut SlotAllocator, backend: Arc<dyn ByteBackend>) -> (Self, u64) {
        let start = alloc.position();
        let accumulated_value = Double::new(backend.clone(), alloc.allocate(Double::SIZE), false);
        let nan_steps = Int::new(backend, alloc.allocate(Int::SIZE), false);
        (
            Self {
                accumulated_value,
                nan_steps,
            },
            alloc.position() - start,
        )
    }

    pub(crate) fn init(&self) -> Result<()> {
        self.accumulated_value.set(f64::NAN)?;
        self.nan_steps.set(0)?;
        Ok(())
    }

    pub fn accumulated_value(&self) -> Result<f64> {
        self.accumulated_value.get()
    }

    pub fn nan_steps(&self) -> Result<i32> {
        self.nan_steps.get()
    }

    /// Loads state supplied by a [`crate::importer::Importer`] directly, bypassing
    /// [`ArcState::init`]'s brand-new-database defaults.
    pub(crate) fn load_imported_state(&self, accumulated_value: f64, nan_steps: i32) -> Result<()> {
        self.accumulated_value.set(accumulated_value)?;
        self.nan_steps.set(nan_steps)?;
        Ok(())
    }

    pub(crate) fn copy_state_from(&self, other: &ArcState) -> Result<()> {
        self.accumulated_value.set(other.accumulated_value()?)?;
        self.nan_steps.set(other.nan_steps()?)?;
        Ok(())
    }

    fn combine(&self, cf: ConsolidationFunction, pdp: f64) -> Result<()> {
        if pdp.is_nan() {
            let n = self.nan_steps.get()?;
            self.nan_steps.set(n + 1)?;
            return Ok(());
        }
        let acc = self.accumulated_value.get()?;
        let new_acc = match cf {
            ConsolidationFunction::Average => nan_safe_sum(acc, pdp),
            ConsolidationFunction::Min => nan_safe_min(acc, pdp),
            ConsolidationFunction::Max => nan_safe_max(acc, pdp),
            ConsolidationFunction::Last => pdp,
        };
        // Always write back, even when the value is unchanged: `combine` must remain
        // deterministic regardless of whether the backend considers this a no-op write.
        self.accumulated_value.set(new_acc)
    }

    fn finalize(&self, cf: ConsolidationFunction, steps: i32) -> Result<f64> {
        let acc = self.accumulated_value.get()?;
        let nan_steps = self.nan_steps.get()?;
        let v = match cf {
            ConsolidationFunction::Average => acc / ((steps - nan_steps) as f64),
            _ => acc,
        };
        self.accumulated_value.set(f64::NAN)?;
        self.nan_steps.set(0)?;
        Ok(v)
    }
}

/// Runs the CDP pipeline (§4.5) for one archive/source pair: folds `pdp` (representing
/// `num_steps` completed primary steps) into `state`, finalizing and writing rows into
/// `robin` as archive-row boundaries are crossed.
///
/// `first_step_end` is the absolute end time of the *first* of the `num_steps` completed
/// primary steps. There is no persisted count of how many PDPs are already folded into the
/// currently-open row, so how many of `num_steps` are needed to close it is derived purely
/// from this row's alignment against the archive's own time grid (`steps * primary_step`).
pub(crate) fn update_archive(
    header: &ArchiveHeader,
    state: &ArcState,
    robin: &Robin,
    pdp: f64,
    mut num_steps: i64,
    first_step_end: i64,
    primary_step: i64,
) -> Result<()> {
    let cf = header.cf()?;
    let steps = header.steps()? as i64;
    let rows = header.rows()?;
    let xff = header.xff()?;
    let archive_step = steps * primary_step;

    // Step 1: finish the current, partially-filled row. The row closes on the first
    // primary-step end that lands on the archive's own grid; since that grid runs at a
    // coarser period than the primary step, anywhere from 1 to `steps` folds of this same
    // PDP value may be required before that boundary is reached.
    let rem = first_step_end % archive_step;
    let steps_to_close = if rem == 0 { 1 } else { (archive_step - rem) / primary_step + 1 };

    if steps_to_close <= num_steps {
        for _ in 0..steps_to_close {
            state.combine(cf, pdp)?;
        }
        num_steps -= steps_to_close;
        finalize_row(header, state, robin, cf, steps as i32, xff)?;
    } else {
        for _ in 0..num_steps {
            state.combine(cf, pdp)?;
        }
        return Ok(());
    }

    if num_steps == 0 {
        return Ok(());
    }

    // Step 2: bulk fill -- whole rows made entirely of this one repeated PDP value.
    let bulk_rows = std::cmp::min(num_steps / steps, rows as i64);
    if bulk_rows > 0 {
        let value = if pdp.is_nan() { f64::NAN } else { pdp };
        robin.bulk_store(value, bulk_rows as usize)?;
    }

    // Step 3: fold the remainder into the next, now-current row.
    let remainder = num_steps % steps;
    for _ in 0..remainder {
        state.combine(cf, pdp)?;
    }

    Ok(())
}

fn finalize_row(
    _header: &ArchiveHeader,
    state: &ArcState,
    robin: &Robin,
    cf: ConsolidationFunction,
    steps: i32,
    xff: f64,
) -> Result<()> {
    let nan_steps = state.nan_steps()?;
    let mut v = state.finalize(cf, steps)?;
    if (nan_steps as f64) > xff * (steps as f64) || v.is_nan() {
        v = f64::NAN;
    }
    robin.store(v)
}
