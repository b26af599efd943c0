//! Per-source definition and running PDP accumulator (§3, §4.4).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::ByteBackend;
use crate::error::{InvalidDefinitionSnafu, Result};
use crate::primitives::{Double, Long, SlotAllocator, Str, STRLEN};
use snafu::ensure;

/// The four source kinds a [`DataSource`] may be declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DsType {
    Gauge,
    Counter,
    Derive,
    Absolute,
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DsType::Gauge => "GAUGE",
            DsType::Counter => "COUNTER",
            DsType::Derive => "DERIVE",
            DsType::Absolute => "ABSOLUTE",
        };
        f.write_str(s)
    }
}

impl FromStr for DsType {
    type Err = crate::error::RrdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GAUGE" => Ok(DsType::Gauge),
            "COUNTER" => Ok(DsType::Counter),
            "DERIVE" => Ok(DsType::Derive),
            "ABSOLUTE" => Ok(DsType::Absolute),
            other => InvalidDefinitionSnafu {
                reason: format!("unrecognized data source type '{other}'"),
            }
            .fail(),
        }
    }
}

/// A data source definition, staged for [`crate::database::Database::create`].
#[derive(Debug, Clone)]
pub struct DsDef {
    pub name: String,
    pub ds_type: DsType,
    pub heartbeat: i64,
    pub min: f64,
    pub max: f64,
}

impl DsDef {
    pub fn new(name: impl Into<String>, ds_type: DsType, heartbeat: i64, min: f64, max: f64) -> Result<Self> {
        let name = name.into();
        ensure!(
            !name.is_empty(),
            InvalidDefinitionSnafu {
                reason: "data source name must not be empty".to_string(),
            }
        );
        ensure!(
            name.chars().count() <= STRLEN,
            InvalidDefinitionSnafu {
                reason: format!("data source name '{name}' exceeds {STRLEN} characters"),
            }
        );
        ensure!(
            heartbeat > 0,
            InvalidDefinitionSnafu {
                reason: format!("heartbeat must be positive, got {heartbeat}"),
            }
        );
        ensure!(
            min.is_nan() || max.is_nan() || min < max,
            InvalidDefinitionSnafu {
                reason: format!("min ({min}) must be less than max ({max})"),
            }
        );
        Ok(Self {
            name,
            ds_type,
            heartbeat,
            min,
            max,
        })
    }
}

/// The result of feeding one raw sample through a source's PDP accumulator: either the
/// sample was absorbed into the current, still-open step, or a step boundary was crossed
/// and a consolidated PDP (plus the count of primary steps it represents) is ready to be
/// handed to every archive tracking this source.
#[derive(Debug, Clone, Copy)]
pub enum PdpOutcome {
    StillAccumulating,
    StepCompleted {
        pdp: f64,
        num_steps: i64,
        /// The absolute end time of the first of the `num_steps` completed primary steps.
        first_step_end: i64,
    },
}

/// A live data source: its immutable definition plus the running PDP accumulator state
/// (§3's "Running state").
pub struct DataSource {
    name: Str,
    ds_type: Str,
    heartbeat: Long,
    min: Double,
    max: Double,
    last_value: Double,
    accumulated_value: Double,
    unknown_seconds: Double,
}

impl DataSource {
    pub(crate) fn allocate(alloc: &mut SlotAllocator, backend: Arc<dyn ByteBackend>) -> (Self, u64) {
        let start = alloc.position();
        let name = Str::new(backend.clone(), alloc.allocate(Str::SIZE), true);
        let ds_type = Str::new(backend.clone(), alloc.allocate(Str::SIZE), true);
        let heartbeat = Long::new(backend.clone(), alloc.allocate(Long::SIZE), true);
        let min = Double::new(backend.clone(), alloc.allocate(Double::SIZE), true);
        let max = Double::new(backend.clone(), alloc.allocate(Double::SIZE), true);
        let last_value = Double::new(backend.clone(), alloc.allocate(Double::SIZE), false);
        let accumulated_value = Double::new(backend.clone(), alloc.allocate(Double::SIZE), false);
        let unknown_seconds = Double::new(backend, alloc.allocate(Double::SIZE), false);
        let ds = Self {
            name,
            ds_type,
            heartbeat,
            min,
            max,
            last_value,
            accumulated_value,
            unknown_seconds,
        };
        (ds, alloc.position() - start)
    }

    pub(crate) fn init(&self, def: &DsDef, start_time: i64, step: i64) -> Result<()> {
        self.name.set(&def.name)?;
        self.ds_type.set(&def.ds_type.to_string())?;
        self.heartbeat.set(def.heartbeat)?;
        self.min.set(def.min)?;
        self.max.set(def.max)?;
        self.last_value.set(f64::NAN)?;
        self.accumulated_value.set(0.0)?;
        self.unknown_seconds.set((start_time.rem_euclid(step)) as f64)?;
        Ok(())
    }

    pub fn name(&self) -> Result<String> {
        self.name.get()
    }

    pub fn ds_type(&self) -> Result<DsType> {
        self.ds_type.get()?.parse()
    }

    pub fn heartbeat(&self) -> Result<i64> {
        self.heartbeat.get()
    }

    pub fn min(&self) -> Result<f64> {
        self.min.get()
    }

    pub fn max(&self) -> Result<f64> {
        self.max.get()
    }

    pub fn last_value(&self) -> Result<f64> {
        self.last_value.get()
    }

    /// Feeds one raw sample through the PDP accumulator (§4.4). `t0` is the previous
    /// update time, `t1` the new sample time, `raw` the new reading (`NaN` if unknown).
    pub(crate) fn process_sample(&self, t0: i64, t1: i64, raw: f64, step: i64) -> Result<PdpOutcome> {
        let ds_type = self.ds_type()?;
        let heartbeat = self.heartbeat()?;
        let min = self.min()?;
        let max = self.max()?;
        let v0 = self.last_value()?;
        let name = self.name()?;

        let mut rate = compute_rate(ds_type, v0, raw, t1 - t0);
        if t1 - t0 > heartbeat {
            rate = f64::NAN;
        }
        if !rate.is_nan() {
            if !min.is_nan() && rate < min {
                rate = f64::NAN;
            }
            if !max.is_nan() && rate > max {
                rate = f64::NAN;
            }
        }

        self.last_value.set(raw)?;

        let step_start = crate::util::step_floor(t0, step);
        let step_end = step_start + step;
        let boundary = crate::util::step_floor(t1, step);

        let mut accumulated = self.accumulated_value.get()?;
        let mut unknown = self.unknown_seconds.get()?;

        if t1 < step_end {
            accumulate(&mut accumulated, &mut unknown, t0, t1, rate);
            self.accumulated_value.set(accumulated)?;
            self.unknown_seconds.set(unknown)?;
            return Ok(PdpOutcome::StillAccumulating);
        }

        accumulate(&mut accumulated, &mut unknown, t0, boundary, rate);

        let denom = (boundary - step_start) as f64 - unknown;
        let mut pdp = if unknown <= heartbeat as f64 && denom > 0.0 {
            accumulated / denom
        } else {
            f64::NAN
        };
        if pdp.is_nan() && name.ends_with('!') {
            pdp = 0.0;
        }
        let num_steps = (boundary - step_end) / step + 1;

        accumulated = 0.0;
        unknown = 0.0;
        accumulate(&mut accumulated, &mut unknown, boundary, t1, rate);
        self.accumulated_value.set(accumulated)?;
        self.unknown_seconds.set(unknown)?;

        Ok(PdpOutcome::StepCompleted {
            pdp,
            num_steps,
            first_step_end: step_end,
        })
    }

    /// Loads running state supplied by a [`crate::importer::Importer`], bypassing the
    /// `start_time`-derived defaults [`DataSource::init`] uses for a brand-new database.
    pub(crate) fn load_imported_state(&self, last_value: f64, accumulated_value: f64, unknown_seconds: f64) -> Result<()> {
        self.last_value.set(last_value)?;
        self.accumulated_value.set(accumulated_value)?;
        self.unknown_seconds.set(unknown_seconds)?;
        Ok(())
    }

    pub(crate) fn copy_state_from(&self, other: &DataSource) -> Result<()> {
        self.last_value.set(other.last_value()?)?;
        self.accumulated_value.set(other.accumulated_value.get()?)?;
        self.unknown_seconds.set(other.unknown_seconds.get()?)?;
        Ok(())
    }
}

fn accumulate(accumulated: &mut f64, unknown_seconds: &mut f64, a: i64, b: i64, rate: f64) {
    let span = (b - a) as f64;
    if span <= 0.0 {
        return;
    }
    if rate.is_nan() {
        *unknown_seconds += span;
    } else {
        *accumulated += rate * span;
    }
}

fn compute_rate(ds_type: DsType, v0: f64, v1: f64, dt: i64) -> f64 {
    let dt = dt as f64;
    match ds_type {
        DsType::Gauge => v1,
        DsType::Absolute => {
            if v1.is_nan() {
                f64::NAN
            } else {
                v1 / dt
            }
        }
        DsType::Derive => {
            if v0.is_nan() || v1.is_nan() {
                f64::NAN
            } else {
                (v1 - v0) / dt
            }
        }
        DsType::Counter => {
            if v0.is_nan() || v1.is_nan() {
                return f64::NAN;
            }
            let mut diff = v1 - v0;
            if diff < 0.0 {
                diff += 2f64.powi(32);
                if diff < 0.0 {
                    diff += 2f64.powi(64) - 2f64.powi(32);
                    if diff < 0.0 {
                        return f64::NAN;
                    }
                }
            }
            diff / dt
        }
    }
}
