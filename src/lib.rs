//! NQM: compound queries over network quality measurements.
//!
//! The workspace is split into a few crates:
//!
//! * `nqm-core`: errors, configuration and logging shared by every crate
//! * `nqm-query`: the compound query model, its digest and compact form
//! * `nqm-cli`: the `nqm` command-line tool
//!
//! This crate re-exports the commonly used items of both libraries.

pub use nqm_core::{config, errors, logging, CoreConfig, Environment, NqmError};
pub use nqm_query::{compact, defaults, error, model, purify, prelude};
pub use nqm_query::{
    compress, decompress, QueryDefaults, QueryDigest, QueryError, COMPACT_VERSION,
};
pub use nqm_query::model::{CompoundQuery, TimeFilter, TimeRange, TimeUnit, TimeWithUnit};

/// Version of the compact query format this build reads and writes.
pub const COMPACT_FORMAT_VERSION: u8 = COMPACT_VERSION;

/// Whether a compact payload version can be decoded by this build.
pub fn verify_protocol_compatibility(version: u8) -> bool {
    version == COMPACT_FORMAT_VERSION
}
