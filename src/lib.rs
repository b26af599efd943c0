//! A pure, self-contained reimplementation of the Round-Robin Database (RRD) storage
//! engine: a fixed-size, time-series database that consolidates regular samples of one or
//! more data sources into several coexisting circular archives, each at a different
//! temporal resolution.
//!
//! The three tightly coupled subsystems that make this interesting as a systems problem
//! live in [`datasource`] (the primary-data-point processor), [`archive`] (the
//! consolidated-data-point pipeline), and [`backend`]/[`primitives`]/[`robin`] (the
//! fixed-offset byte-addressable storage layer). [`fetch`], [`processor`], [`rpn`], and
//! [`aggregate`] build the read-side: archive selection, multi-source time-grid alignment,
//! the RPN expression evaluator, and the percentile/aggregate reductions.
//!
//! Out of scope, same as the system this crate reimplements: at-style time-string parsing,
//! XML import/export and templating, graph rendering, an interactive inspector UI, and
//! demo/CLI entry points. [`importer`] exposes only the minimal bulk-state-injection trait
//! those formats would be built on top of.

#[macro_use]
extern crate tracing;

pub mod aggregate;
pub mod archive;
pub mod backend;
pub mod config;
pub mod database;
pub mod datasource;
pub mod error;
pub mod fetch;
pub mod header;
pub mod importer;
pub mod normalize;
pub mod pool;
pub mod primitives;
pub mod processor;
pub mod robin;
pub mod rpn;
pub mod sample;
mod util;

pub use archive::{ArchiveDef, ConsolidationFunction};
pub use config::{PoolConfig, RrdDef};
pub use database::{Database, DatabaseInfo};
pub use datasource::{DsDef, DsType};
pub use error::{Result, RrdError};
pub use fetch::{FetchData, FetchRequest};
pub use pool::Pool;
pub use sample::Sample;
