//! Stitches together multiple archives and sources onto one normalized time grid, then
//! layers derived columns (RPN, aggregates, percentiles) on top (§4.9).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use snafu::ensure;

use crate::aggregate::{self, Aggregation};
use crate::archive::ConsolidationFunction;
use crate::error::{InvalidArgumentSnafu, Result};
use crate::fetch::FetchRequest;
use crate::normalize::normalize;
use crate::pool::Pool;
use crate::rpn::{RpnContext, RpnProgram};
use crate::util::step_floor;

/// A user-supplied callback series, sampled once per normalized timestamp (§4.9's PDEF).
pub trait Plottable: Send + Sync {
    fn value_at(&self, timestamp: i64) -> f64;
}

enum SourceSpec {
    Def {
        name: String,
        path: PathBuf,
        ds_name: String,
        cf: ConsolidationFunction,
    },
    PDef {
        name: String,
        plottable: Arc<dyn Plottable>,
    },
    CDef {
        name: String,
        program: RpnProgram,
    },
    SDef {
        name: String,
        source_name: String,
        agg: Aggregation,
    },
    Percentile {
        name: String,
        source_name: String,
        p: f64,
    },
}

impl SourceSpec {
    fn name(&self) -> &str {
        match self {
            SourceSpec::Def { name, .. }
            | SourceSpec::PDef { name, .. }
            | SourceSpec::CDef { name, .. }
            | SourceSpec::SDef { name, .. }
            | SourceSpec::Percentile { name, .. } => name,
        }
    }
}

/// The result of [`DataProcessor::process`]: a shared, normalized timestamp axis plus one
/// named column per declared source, in declaration order.
#[derive(Debug, Clone)]
pub struct ProcessedData {
    pub timestamps: Vec<i64>,
    pub order: Vec<String>,
    pub columns: HashMap<String, Vec<f64>>,
}

impl ProcessedData {
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}

/// Builds a normalized, multi-source time grid out of DEF/PDEF/CDEF/SDEF/Percentile
/// declarations, mirroring the rrdtool-family "graph def" pipeline without the rendering
/// step (explicitly out of scope, per spec.md §1).
pub struct DataProcessor {
    t1: i64,
    t2: i64,
    step: Option<i64>,
    now: Option<i64>,
    specs: Vec<SourceSpec>,
}

impl DataProcessor {
    /// `t2 = 0` means "resolve later", to the earliest covered archive end across DEFs.
    pub fn new(t1: i64, t2: i64) -> Self {
        Self {
            t1,
            t2,
            step: None,
            now: None,
            specs: Vec::new(),
        }
    }

    /// Requests an output step; the engine still clamps upward to the coarsest step any
    /// DEF can actually supply.
    pub fn step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Overrides the value the RPN `NOW`/`TIME` tokens resolve to. Defaults to the actual
    /// wall-clock time at the moment of [`DataProcessor::process`]; tests that use `NOW`
    /// should set this explicitly for a reproducible result.
    pub fn now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn def(mut self, name: impl Into<String>, path: impl Into<PathBuf>, ds_name: impl Into<String>, cf: ConsolidationFunction) -> Self {
        self.specs.push(SourceSpec::Def {
            name: name.into(),
            path: path.into(),
            ds_name: ds_name.into(),
            cf,
        });
        self
    }

    pub fn pdef(mut self, name: impl Into<String>, plottable: Arc<dyn Plottable>) -> Self {
        self.specs.push(SourceSpec::PDef { name: name.into(), plottable });
        self
    }

    pub fn cdef(mut self, name: impl Into<String>, rpn_expression: &str) -> Result<Self> {
        let program = RpnProgram::parse(rpn_expression)?;
        self.specs.push(SourceSpec::CDef { name: name.into(), program });
        Ok(self)
    }

    pub fn sdef(mut self, name: impl Into<String>, source_name: impl Into<String>, agg: Aggregation) -> Self {
        self.specs.push(SourceSpec::SDef {
            name: name.into(),
            source_name: source_name.into(),
            agg,
        });
        self
    }

    pub fn percentile(mut self, name: impl Into<String>, source_name: impl Into<String>, p: f64) -> Result<Self> {
        ensure!(
            (0.0..=100.0).contains(&p),
            InvalidArgumentSnafu {
                reason: format!("percentile must be in [0, 100], got {p}"),
            }
        );
        self.specs.push(SourceSpec::Percentile {
            name: name.into(),
            source_name: source_name.into(),
            p,
        });
        Ok(self)
    }

    /// Runs the full pipeline (§4.9 (a)-(g)) against `pool`, acquiring and releasing each
    /// DEF's database for the duration of its fetch.
    pub fn process(&self, pool: &Pool) -> Result<ProcessedData> {
        let defs: Vec<(PathBuf, String, ConsolidationFunction)> = self
            .specs
            .iter()
            .filter_map(|s| match s {
                SourceSpec::Def { path, ds_name, cf, .. } => Some((path.clone(), ds_name.clone(), *cf)),
                _ => None,
            })
            .collect();

        // (a) group DEFs sharing (path, cf) into one physical fetch.
        let mut groups: Vec<(PathBuf, ConsolidationFunction, Vec<String>)> = Vec::new();
        for (path, ds_name, cf) in &defs {
            if let Some(g) = groups.iter_mut().find(|(p, c, _)| p == path && c == cf) {
                if !g.2.iter().any(|n| n == ds_name) {
                    g.2.push(ds_name.clone());
                }
            } else {
                groups.push((path.clone(), *cf, vec![ds_name.clone()]));
            }
        }

        // (b) resolve t2 = 0 against the earliest archive end any group can supply.
        let mut t2 = self.t2;
        let mut min_archive_step: Option<i64> = None;
        let mut group_ends: Vec<i64> = Vec::new();

        for (path, cf, _) in &groups {
            let db = pool.acquire(path)?;
            let probe_end = if self.t2 == 0 { self.t1 } else { self.t2 };
            let idx = crate::fetch::select_archive(&db, *cf, self.t1, probe_end, 1)?;
            let (_, end, archive_step) = db.archive_window(idx)?;
            group_ends.push(end);
            min_archive_step = Some(min_archive_step.map_or(archive_step, |m: i64| m.min(archive_step)));
            pool.release(&db)?;
        }

        if t2 == 0 {
            t2 = group_ends.into_iter().min().unwrap_or(self.t1) - 1;
        }

        // (c) choose the output step.
        let base_step = min_archive_step.unwrap_or(1).max(1);
        let out_step = match self.step {
            Some(requested) => requested.max(base_step),
            None => base_step,
        };

        // (d) build the normalized timestamp vector.
        let start = step_floor(self.t1, out_step);
        let end = if t2 % out_step == 0 { t2 } else { step_floor(t2, out_step) + out_step };
        let row_count = ((end - start) / out_step + 1) as usize;
        let timestamps: Vec<i64> = (0..row_count).map(|i| start + (i as i64) * out_step).collect();

        // (e) fetch and normalize each DEF group, keyed back out per column name.
        let mut columns: HashMap<String, Vec<f64>> = HashMap::new();
        for (path, cf, ds_names) in &groups {
            let db = pool.acquire(path)?;
            let req = FetchRequest::new(*cf, start, end)?.resolution(out_step)?.sources(ds_names.clone());
            let data = db.fetch(&req)?;
            pool.release(&db)?;

            let raw_timestamps = data.timestamps();
            for spec in &self.specs {
                if let SourceSpec::Def {
                    name,
                    path: p,
                    ds_name,
                    cf: c,
                } = spec
                {
                    if p == path && c == cf {
                        if let Some(raw_values) = data.column(ds_name) {
                            let normalized = normalize(&raw_timestamps, raw_values, data.step, &timestamps, out_step);
                            columns.insert(name.clone(), normalized);
                        }
                    }
                }
            }
        }

        // (f) PDEFs: sampled once per normalized timestamp.
        for spec in &self.specs {
            if let SourceSpec::PDef { name, plottable } = spec {
                let col = timestamps.iter().map(|&t| plottable.value_at(t)).collect();
                columns.insert(name.clone(), col);
            }
        }

        // (g) SDEF, CDEF, Percentile in declaration order, so later ones may read earlier
        // derived columns.
        let mut order = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            order.push(spec.name().to_string());
            match spec {
                SourceSpec::Def { .. } | SourceSpec::PDef { .. } => {}
                SourceSpec::SDef { name, source_name, agg } => {
                    let source = columns.get(source_name).ok_or_else(|| {
                        crate::error::UnknownDataSourceSnafu {
                            name: source_name.clone(),
                        }
                        .build()
                    })?;
                    let value = aggregate::aggregate(&timestamps, source, out_step, self.t1, t2, *agg);
                    columns.insert(name.clone(), vec![value; timestamps.len()]);
                }
                SourceSpec::Percentile { name, source_name, p } => {
                    let source = columns.get(source_name).ok_or_else(|| {
                        crate::error::UnknownDataSourceSnafu {
                            name: source_name.clone(),
                        }
                        .build()
                    })?;
                    let value = aggregate::percentile(&timestamps, source, out_step, self.t1, t2, *p);
                    columns.insert(name.clone(), vec![value; timestamps.len()]);
                }
                SourceSpec::CDef { name, program } => {
                    let mut col = Vec::with_capacity(timestamps.len());
                    for slot in 0..timestamps.len() {
                        let self_prev = if slot == 0 { f64::NAN } else { col[slot - 1] };
                        let ctx = RpnContext {
                            now: self.now.unwrap_or_else(|| chrono::Utc::now().timestamp()),
                            step: out_step,
                            columns: &columns,
                        };
                        col.push(program.eval(slot, self_prev, &ctx)?);
                    }
                    columns.insert(name.clone(), col);
                }
            }
        }

        Ok(ProcessedData {
            timestamps,
            order,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveDef;
    use crate::config::RrdDef;
    use crate::config::PoolConfig;
    use crate::datasource::{DsDef, DsType};
    use temp_dir::TempDir;

    fn make_db(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let def = RrdDef::from_path(&path, 0, 10)
            .data_source(DsDef::new("x", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
            .data_source(DsDef::new("y", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
            .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 100).unwrap())
            .build()
            .unwrap();
        let db = crate::database::Database::create(def).unwrap();
        for t in (10..=200).step_by(10) {
            db.create_sample(t).set("x", 2.0).unwrap().set("y", 6.0).unwrap().update().unwrap();
        }
        db.close().unwrap();
        path
    }

    #[test]
    fn cdef_computes_average_of_two_defs() {
        let dir = TempDir::new().unwrap();
        let path = make_db(&dir, "proc.rrd");
        let pool = Pool::new(PoolConfig::new());

        let processor = DataProcessor::new(10, 100)
            .def("x", &path, "x", ConsolidationFunction::Average)
            .def("y", &path, "y", ConsolidationFunction::Average)
            .cdef("avg", "x,y,+,2,/")
            .unwrap();

        let data = processor.process(&pool).unwrap();
        let avg = data.column("avg").unwrap();
        for &v in avg {
            assert!((v - 4.0).abs() < 1e-9);
        }
    }

    #[test]
    fn percentile_of_a_def_matches_source_behavior() {
        let dir = TempDir::new().unwrap();
        let path = make_db(&dir, "pct.rrd");
        let pool = Pool::new(PoolConfig::new());

        let processor = DataProcessor::new(10, 100)
            .def("x", &path, "x", ConsolidationFunction::Average)
            .percentile("p50", "x", 50.0)
            .unwrap();

        let data = processor.process(&pool).unwrap();
        let p = data.column("p50").unwrap();
        assert!((p[0] - 2.0).abs() < 1e-9);
    }
}
