//! One-shot update builder (§6's `create_sample`/`sample.set`/`sample.update`): stages a
//! timestamp plus a dense or sparse set of per-source readings and submits them to a
//! [`Database`] in a single call.

use crate::database::Database;
use crate::error::{InvalidArgumentSnafu, Result};
use snafu::ensure;

/// A staged update for one database, built incrementally via [`Sample::set`] /
/// [`Sample::set_by_index`] and submitted with [`Sample::update`].
///
/// Unset sources are submitted as `NaN` ("unknown"), exactly as an absent reading would be.
pub struct Sample<'a> {
    db: &'a Database,
    time: i64,
    values: Vec<f64>,
}

impl<'a> Sample<'a> {
    pub(crate) fn new(db: &'a Database, time: i64) -> Self {
        let values = vec![f64::NAN; db.source_count()];
        Self { db, time, values }
    }

    /// Stages a reading for the data source named `name`.
    pub fn set(mut self, name: &str, value: f64) -> Result<Self> {
        let idx = self.db.source_index(name)?;
        self.values[idx] = value;
        Ok(self)
    }

    /// Stages a reading by positional data-source index, in declaration order.
    pub fn set_by_index(mut self, index: usize, value: f64) -> Result<Self> {
        ensure!(
            index < self.values.len(),
            InvalidArgumentSnafu {
                reason: format!("data source index {index} out of range"),
            }
        );
        self.values[index] = value;
        Ok(self)
    }

    /// Submits this sample: feeds every source's staged reading (or `NaN` if never set)
    /// through the PDP processor and, for any source whose step just completed, through
    /// every archive's CDP pipeline.
    pub fn update(self) -> Result<()> {
        self.db.apply_update(self.time, &self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveDef, ConsolidationFunction};
    use crate::config::RrdDef;
    use crate::datasource::{DsDef, DsType};

    fn make_db() -> Database {
        let def = RrdDef::from_path("mem://sample-test", 1000, 10)
            .data_source(DsDef::new("a", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
            .data_source(DsDef::new("b", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
            .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 10).unwrap())
            .build()
            .unwrap();
        Database::create_in_memory(def).unwrap()
    }

    #[test]
    fn set_by_name_leaves_others_unknown() {
        let db = make_db();
        db.create_sample(1010).set("a", 5.0).unwrap().update().unwrap();
        assert_eq!(db.last_update_time().unwrap(), 1010);
    }

    #[test]
    fn set_by_index_matches_set_by_name() {
        let db = make_db();
        db.create_sample(1010)
            .set_by_index(0, 5.0)
            .unwrap()
            .set_by_index(1, 6.0)
            .unwrap()
            .update()
            .unwrap();
        assert_eq!(db.last_update_time().unwrap(), 1010);
    }

    #[test]
    fn unknown_source_name_rejected() {
        let db = make_db();
        let err = db.create_sample(1010).set("nope", 1.0);
        assert!(err.is_err());
    }
}
