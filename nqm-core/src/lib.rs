//! Core shared library for the NQM query services.
//!
//! This crate exposes the primitives every NQM crate depends on: the
//! canonical error type, configuration loading and logging setup, plus a
//! couple of JSON helpers with shared error semantics.

pub mod config;
pub mod errors;
pub mod logging;
pub mod serde_utils;

pub use config::{CoreConfig, Environment};
pub use errors::{ConfigError, NqmError, Result as CoreResult};
