//! The fetch engine (§4.7): archive selection and materialization of an aligned
//! `[start, end]` time-series window.

use snafu::ensure;

use crate::archive::ConsolidationFunction;
use crate::database::Database;
use crate::error::{InvalidArgumentSnafu, NoMatchingArchiveSnafu, Result};

/// A request to materialize an aligned time-series window from a database's archives.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    cf: ConsolidationFunction,
    start: i64,
    end: i64,
    resolution: i64,
    sources: Option<Vec<String>>,
}

impl FetchRequest {
    /// `resolution` defaults to 1 (accept any archive step, preferring the finest).
    pub fn new(cf: ConsolidationFunction, start: i64, end: i64) -> Result<Self> {
        ensure!(
            start <= end,
            InvalidArgumentSnafu {
                reason: format!("fetch start {start} must not exceed end {end}"),
            }
        );
        Ok(Self {
            cf,
            start,
            end,
            resolution: 1,
            sources: None,
        })
    }

    pub fn resolution(mut self, resolution: i64) -> Result<Self> {
        ensure!(
            resolution >= 1,
            InvalidArgumentSnafu {
                reason: format!("resolution must be >= 1, got {resolution}"),
            }
        );
        self.resolution = resolution;
        Ok(self)
    }

    /// Restricts the result to these source names. Without this, all sources are returned.
    pub fn sources(mut self, names: Vec<String>) -> Self {
        self.sources = Some(names);
        self
    }
}

/// The materialized result of a fetch: a shared timestamp axis plus one column of values
/// per selected source, newest-last.
#[derive(Debug, Clone)]
pub struct FetchData {
    pub start: i64,
    pub step: i64,
    pub ds_names: Vec<String>,
    /// `columns[c][t]` is the value of `ds_names[c]` at `start + t*step`.
    pub columns: Vec<Vec<f64>>,
}

impl FetchData {
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn timestamps(&self) -> Vec<i64> {
        (0..self.row_count()).map(|i| self.start + (i as i64) * self.step).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.ds_names.iter().position(|n| n == name).map(|i| self.columns[i].as_slice())
    }
}

struct Candidate {
    idx: usize,
    start: i64,
    end: i64,
    step: i64,
}

fn candidates(db: &Database, cf: ConsolidationFunction) -> Result<Vec<Candidate>> {
    let archives = db.archives()?;
    let mut out = Vec::new();
    for (idx, (archive_cf, _, _)) in archives.iter().enumerate() {
        if *archive_cf != cf {
            continue;
        }
        let (start, end, step) = db.archive_window(idx)?;
        out.push(Candidate { idx, start, end, step });
    }
    Ok(out)
}

/// Selects the best archive for `cf` covering `[start, end]` at the requested `resolution`,
/// per §4.7's tie-break order: prefer a full match closest in step to `resolution`
/// (ties broken by declaration order), else the partial match with maximal overlap.
pub(crate) fn select_archive(db: &Database, cf: ConsolidationFunction, start: i64, end: i64, resolution: i64) -> Result<usize> {
    let candidates = candidates(db, cf)?;
    ensure!(!candidates.is_empty(), NoMatchingArchiveSnafu { cf });

    let full_matches: Vec<&Candidate> = candidates.iter().filter(|c| c.start <= start && c.end >= end).collect();
    if !full_matches.is_empty() {
        let mut best = full_matches[0];
        for c in &full_matches[1..] {
            if (c.step - resolution).abs() < (best.step - resolution).abs() {
                best = c;
            }
        }
        return Ok(best.idx);
    }

    let mut best: Option<(&Candidate, i64)> = None;
    for c in &candidates {
        let overlap_start = c.start.max(start);
        let overlap_end = c.end.min(end);
        if overlap_end <= overlap_start {
            continue;
        }
        let overlap = overlap_end - overlap_start;
        match &best {
            Some((_, best_overlap)) if *best_overlap >= overlap => {}
            _ => best = Some((c, overlap)),
        }
    }
    best.map(|(c, _)| c.idx).ok_or_else(|| NoMatchingArchiveSnafu { cf }.build())
}

/// The weaker selector exposed alongside [`select_archive`] (§4.7) through
/// [`crate::database::Database::find_start_match`]: among archives matching `cf` whose
/// covered window starts at or before `start_time`, the one closest in step to
/// `resolution`; otherwise the overall closest-in-step archive matching `cf`.
pub(crate) fn find_start_match(db: &Database, cf: ConsolidationFunction, start_time: i64, resolution: i64) -> Result<usize> {
    let candidates = candidates(db, cf)?;
    ensure!(!candidates.is_empty(), NoMatchingArchiveSnafu { cf });

    let starting: Vec<&Candidate> = candidates.iter().filter(|c| c.start <= start_time).collect();
    let pool = if starting.is_empty() { candidates.iter().collect() } else { starting };

    let mut best = pool[0];
    for c in &pool[1..] {
        if (c.step - resolution).abs() < (best.step - resolution).abs() {
            best = c;
        }
    }
    Ok(best.idx)
}

pub(crate) fn fetch_data(db: &Database, req: &FetchRequest) -> Result<FetchData> {
    let archive_idx = select_archive(db, req.cf, req.start, req.end, req.resolution)?;
    let (_, _, archive_step) = db.archive_window(archive_idx)?;

    let start = crate::util::step_floor(req.start, archive_step);
    let end = if req.end % archive_step == 0 {
        req.end
    } else {
        crate::util::step_floor(req.end, archive_step) + archive_step
    };
    let row_count = ((end - start) / archive_step + 1) as usize;

    let all_names = db.data_source_names()?;
    let selected: Vec<(usize, String)> = match &req.sources {
        Some(names) => names
            .iter()
            .map(|n| Ok((db.source_index(n)?, n.clone())))
            .collect::<Result<_>>()?,
        None => all_names.into_iter().enumerate().collect(),
    };

    let mut columns = Vec::with_capacity(selected.len());
    for (source_idx, _) in &selected {
        let mut col = Vec::with_capacity(row_count);
        for i in 0..row_count {
            let ts = start + (i as i64) * archive_step;
            col.push(db.robin_value_at(archive_idx, *source_idx, ts)?);
        }
        columns.push(col);
    }

    Ok(FetchData {
        start,
        step: archive_step,
        ds_names: selected.into_iter().map(|(_, n)| n).collect(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveDef;
    use crate::config::RrdDef;
    use crate::datasource::{DsDef, DsType};

    fn counter_db() -> Database {
        let def = RrdDef::from_path("mem://fetch-test", 920804400, 300)
            .data_source(DsDef::new("speed", DsType::Counter, 600, f64::NAN, f64::NAN).unwrap())
            .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 24).unwrap())
            .build()
            .unwrap();
        Database::create_in_memory(def).unwrap()
    }

    #[test]
    fn counter_tutorial_matches_spec_example() {
        let db = counter_db();
        let samples = [
            (920804700, 12345.0),
            (920805000, 12357.0),
            (920805300, 12363.0),
            (920805600, 12363.0),
            (920805900, 12363.0),
            (920806200, 12373.0),
            (920806500, 12383.0),
            (920806800, 12393.0),
            (920807100, 12399.0),
            (920807400, 12405.0),
            (920807700, 12411.0),
            (920808000, 12415.0),
            (920808300, 12420.0),
            (920808600, 12422.0),
            (920808900, 12423.0),
        ];
        for (t, v) in samples {
            db.create_sample(t).set("speed", v).unwrap().update().unwrap();
        }

        let req = FetchRequest::new(ConsolidationFunction::Average, 920804400, 920809200)
            .unwrap();
        let data = fetch_data(&db, &req).unwrap();

        let expected = [
            f64::NAN,
            f64::NAN,
            0.04,
            0.02,
            0.00,
            0.00,
            0.033333333333333,
            0.033333333333333,
            0.033333333333333,
            0.02,
            0.02,
            0.02,
            0.013333333333333,
            0.016666666666667,
            0.006666666666667,
            0.003333333333333,
            f64::NAN,
        ];
        let col = &data.columns[0];
        assert_eq!(col.len(), expected.len());
        for (got, want) in col.iter().zip(expected.iter()) {
            if want.is_nan() {
                assert!(got.is_nan(), "expected NaN, got {got}");
            } else {
                assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
            }
        }
    }

    #[test]
    fn full_match_prefers_closest_step_on_tie_first_declared() {
        let def = RrdDef::from_path("mem://fetch-tie", 0, 10)
            .data_source(DsDef::new("x", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
            .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 2, 100).unwrap())
            .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 4, 100).unwrap())
            .build()
            .unwrap();
        let db = Database::create_in_memory(def).unwrap();
        let idx = select_archive(&db, ConsolidationFunction::Average, 0, 100, 20).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn find_start_match_picks_closest_step_among_archives_starting_in_time() {
        let db = counter_db();
        for (t, v) in [(920804700, 12345.0), (920805000, 12357.0)] {
            db.create_sample(t).set("speed", v).unwrap().update().unwrap();
        }
        let def = db.find_start_match(ConsolidationFunction::Average, 920804400, 300).unwrap();
        assert_eq!(def.cf, ConsolidationFunction::Average);
        assert_eq!(def.steps, 1);
    }
}
