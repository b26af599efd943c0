//! The minimal bulk state-injection interface (§6 "Importer contract"). The only consumer
//! this crate implements is [`crate::database::Database::import`]; the XML dump format
//! itself (reading/writing `.xml`) is explicitly out of scope (spec.md §1) and is left to a
//! caller-supplied [`Importer`].

use crate::archive::ConsolidationFunction;
use crate::datasource::DsType;
use crate::error::Result;

/// One data source's definition and running state, as read back from an external dump.
#[derive(Debug, Clone)]
pub struct ImportedDs {
    pub name: String,
    pub ds_type: DsType,
    pub heartbeat: i64,
    pub min: f64,
    pub max: f64,
    pub last_value: f64,
    pub accumulated_value: f64,
    pub nan_seconds: f64,
}

/// One archive's definition, as read back from an external dump.
#[derive(Debug, Clone)]
pub struct ImportedArchive {
    pub cf: ConsolidationFunction,
    pub xff: f64,
    pub steps: i32,
    pub rows: i32,
}

/// Per-(archive, source) state: the CDP accumulator plus the Robin's oldest-to-newest
/// values.
#[derive(Debug, Clone)]
pub struct ImportedArcState {
    pub accumulated_value: f64,
    pub nan_steps: i32,
    pub values: Vec<f64>,
}

/// A bulk state source consumed once, at creation, by [`crate::database::Database::import`].
///
/// §9's Open Question (i) notes the source encodes "consolidation function not yet set"
/// during construction with a sentinel `cf = 99`; this trait has no such state; every
/// [`ImportedArchive`] handed back already carries a resolved [`ConsolidationFunction`].
pub trait Importer {
    fn step(&self) -> Result<i64>;
    fn last_update(&self) -> Result<i64>;
    fn ds_count(&self) -> Result<usize>;
    fn arc_count(&self) -> Result<usize>;
    fn data_source(&self, index: usize) -> Result<ImportedDs>;
    fn archive(&self, index: usize) -> Result<ImportedArchive>;
    fn arc_state(&self, archive_index: usize, ds_index: usize) -> Result<ImportedArcState>;
}
