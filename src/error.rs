//! The single error type surfaced by every fallible operation in this crate.

use std::io;

use snafu::Snafu;

/// All errors produced by the engine collapse into this one tagged enum, mirroring the
/// error-kind catalog of the storage engine this crate reimplements: validation failures
/// never mutate state, `Io` carries through whatever the backend raised, and arithmetic
/// that produces NaN or infinities is never an error -- it simply flows through.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RrdError {
    /// A database or archive/source definition failed validation before anything was
    /// written.
    #[snafu(display("invalid definition: {reason}"))]
    InvalidDefinition { reason: String },

    /// The signature read back from an opened database did not match the expected prefix.
    #[snafu(display("invalid format: {reason}"))]
    InvalidFormat { reason: String },

    /// An update's timestamp did not strictly exceed `last_update_time`.
    #[snafu(display(
        "invalid timestamp: update at {given} must be greater than last update {last_update}"
    ))]
    InvalidTimestamp { given: i64, last_update: i64 },

    /// A data source name did not resolve to a source in the database.
    #[snafu(display("unknown data source: {name}"))]
    UnknownDataSource { name: String },

    /// An archive index or (cf, steps) pair did not resolve to an archive.
    #[snafu(display("unknown archive: {reason}"))]
    UnknownArchive { reason: String },

    /// A fetch request could not be satisfied by any archive.
    #[snafu(display("no archive matches consolidation function {cf:?}"))]
    NoMatchingArchive { cf: crate::archive::ConsolidationFunction },

    /// An RPN expression was malformed, or left the stack in an invalid state.
    #[snafu(display("bad rpn expression: {reason}"))]
    BadRpn { reason: String },

    /// An argument was out of its documented range.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument { reason: String },

    /// Propagated verbatim from the byte backend.
    #[snafu(display("i/o error: {source}"))]
    Io { source: io::Error },

    /// A file backend could not acquire its exclusive sidecar lock.
    #[snafu(display("database already open by another process"))]
    AlreadyOpen,

    /// The database pool is at capacity and non-blocking acquisition was requested.
    #[snafu(display("database pool is full"))]
    PoolFull,

    /// A blocking wait (pool admission, reader/writer lock) was interrupted.
    #[snafu(display("operation interrupted while waiting"))]
    Interrupted,
}

impl From<io::Error> for RrdError {
    fn from(source: io::Error) -> Self {
        RrdError::Io { source }
    }
}

pub type Result<T, E = RrdError> = std::result::Result<T, E>;
