//! Builder-style configuration for database creation and for the pool (§9 Configuration),
//! modeled on `vector-buffers::disk_v2::common::DiskBufferConfig` /
//! `DiskBufferConfigBuilder`: a plain data struct plus a builder that only validates at
//! `build()`, never eagerly.

use std::path::{Path, PathBuf};

use crate::archive::ArchiveDef;
use crate::datasource::DsDef;
use crate::error::{InvalidDefinitionSnafu, Result};
use snafu::ensure;

/// Default capacity of a [`crate::pool::Pool`], mirroring the teacher's
/// `DEFAULT_MAX_DATA_FILE_SIZE`-style named default.
pub const DEFAULT_POOL_CAPACITY: usize = 200;

/// A fully validated database definition, ready for [`crate::database::Database::create`].
#[derive(Clone, Debug)]
pub struct RrdDef {
    pub(crate) path: PathBuf,
    pub(crate) start_time: i64,
    pub(crate) step: i64,
    pub(crate) sources: Vec<DsDef>,
    pub(crate) archives: Vec<ArchiveDef>,
}

impl RrdDef {
    pub fn from_path<P: AsRef<Path>>(path: P, start_time: i64, step: i64) -> RrdDefBuilder {
        RrdDefBuilder {
            path: path.as_ref().to_path_buf(),
            start_time,
            step,
            sources: Vec::new(),
            archives: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn step(&self) -> i64 {
        self.step
    }
}

/// Builder for [`RrdDef`]. Accumulates data-source and archive definitions; validation
/// (§7's `InvalidDefinition` catalog) runs only in [`build`](RrdDefBuilder::build).
#[derive(Clone, Debug)]
pub struct RrdDefBuilder {
    path: PathBuf,
    start_time: i64,
    step: i64,
    sources: Vec<DsDef>,
    archives: Vec<ArchiveDef>,
}

impl RrdDefBuilder {
    pub fn data_source(mut self, def: DsDef) -> Self {
        self.sources.push(def);
        self
    }

    pub fn archive(mut self, def: ArchiveDef) -> Self {
        self.archives.push(def);
        self
    }

    pub fn build(self) -> Result<RrdDef> {
        ensure!(
            !self.sources.is_empty(),
            InvalidDefinitionSnafu {
                reason: "database must declare at least one data source".to_string(),
            }
        );
        ensure!(
            !self.archives.is_empty(),
            InvalidDefinitionSnafu {
                reason: "database must declare at least one archive".to_string(),
            }
        );
        ensure!(
            self.step > 0,
            InvalidDefinitionSnafu {
                reason: format!("step must be positive, got {}", self.step),
            }
        );

        for (i, a) in self.sources.iter().enumerate() {
            for b in &self.sources[i + 1..] {
                ensure!(
                    a.name != b.name,
                    InvalidDefinitionSnafu {
                        reason: format!("duplicate data source name '{}'", a.name),
                    }
                );
            }
        }
        for (i, a) in self.archives.iter().enumerate() {
            for b in &self.archives[i + 1..] {
                ensure!(
                    a.key() != b.key(),
                    InvalidDefinitionSnafu {
                        reason: format!("duplicate archive (cf={}, steps={})", a.cf, a.steps),
                    }
                );
            }
        }

        Ok(RrdDef {
            path: self.path,
            start_time: self.start_time,
            step: self.step,
            sources: self.sources,
            archives: self.archives,
        })
    }
}

/// Configuration for a [`crate::pool::Pool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub(crate) capacity: usize,
    pub(crate) read_only: bool,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
            read_only: false,
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}
