//! Compound query model for NQM (network quality monitoring) reports.
//!
//! A [`CompoundQuery`](model::CompoundQuery) is decoded leniently from JSON,
//! completed with defaults, hashed into a stable [`QueryDigest`] and carried
//! around in a URL-safe compact form.

pub mod compact;
pub mod defaults;
mod digest;
pub mod error;
pub mod model;
pub mod purify;

pub use compact::{compress, compress_with, decompress, decompress_with, COMPACT_VERSION};
pub use defaults::QueryDefaults;
pub use digest::QueryDigest;
pub use error::QueryError;

pub mod prelude {
    pub use crate::compact::{compress, decompress};
    pub use crate::defaults::QueryDefaults;
    pub use crate::digest::QueryDigest;
    pub use crate::error::QueryError;
    pub use crate::model::{
        AgentFilter, CompoundQuery, CompoundQueryFilter, DecodeReport, QueryGrouping, QueryOutput,
        TargetFilter, TimeFilter, TimeRange, TimeUnit, TimeWithUnit,
    };
}
