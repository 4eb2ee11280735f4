use std::fs;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use nqm_core::{ConfigError, NqmError};
use nqm_query::prelude::*;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read query input: {0}")]
    Input(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid reference time '{0}', expected RFC 3339")]
    ReferenceTime(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Core(#[from] NqmError),
}

impl From<io::Error> for CliError {
    fn from(value: io::Error) -> Self {
        Self::Input(value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

/// Raw query text from `path`, or from stdin when `path` is `-`.
pub fn read_input(path: &str) -> Result<String, CliError> {
    if path == "-" {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        return Ok(raw);
    }
    fs::read_to_string(Path::new(path)).map_err(|err| CliError::Input(format!("{}: {}", path, err)))
}

/// Decodes `raw` and fills the omitted sections.
///
/// Field-level issues do not fail the command; they are listed on stderr.
pub fn load_query(raw: &str, defaults: &QueryDefaults) -> Result<CompoundQuery, CliError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| QueryError::MalformedQuery(err.to_string()))?;
    let report = CompoundQuery::decode(&value)?;
    print_issues(&report.issues);

    let query = report.query.with_defaults(defaults);
    debug!(digest = %query.digest(), "loaded compound query");
    Ok(query)
}

pub fn normalize(query: &CompoundQuery) -> Result<String, CliError> {
    Ok(nqm_core::serde_utils::to_pretty_json(query)?)
}

pub fn digest(query: &CompoundQuery, time_only: bool) -> String {
    if time_only {
        query.filters.time.digest().to_hex()
    } else {
        query.digest().to_hex()
    }
}

pub fn compress(query: &CompoundQuery, defaults: &QueryDefaults) -> String {
    let encoded = nqm_query::compress_with(query, defaults);
    info!(chars = encoded.len(), "query compressed");
    encoded
}

pub fn decompress(encoded: &str, defaults: &QueryDefaults) -> Result<String, CliError> {
    let query = nqm_query::decompress_with(encoded, defaults)?;
    normalize(&query)
}

/// Parses `--at`, defaulting to the current instant.
pub fn reference_time(at: Option<&str>) -> Result<DateTime<Utc>, CliError> {
    match at {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|instant| instant.with_timezone(&Utc))
            .map_err(|_| CliError::ReferenceTime(raw.to_string())),
    }
}

/// Concrete window of the query's time filter, `None` when it has none.
pub fn resolve(
    query: &CompoundQuery,
    reference: &DateTime<Utc>,
) -> Result<Option<TimeRange>, CliError> {
    Ok(query.filters.time.resolve(reference)?)
}

pub fn print_range(range: Option<&TimeRange>) {
    match range {
        Some(range) => {
            println!("{} {}", "start:".bold(), range.start.to_rfc3339());
            println!("{} {}", "end:".bold(), range.end.to_rfc3339());
        }
        None => println!("{}", "no time window".yellow()),
    }
}

fn print_issues(issues: &[QueryError]) {
    for issue in issues {
        eprintln!("{} {}", "ignored:".yellow().bold(), issue);
    }
}
