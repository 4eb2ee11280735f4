use std::env;

use tracing::debug;

use crate::errors::ConfigError;

/// Prefix used by [`CoreConfig::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "NQM_";

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Global configuration shared across the NQM crates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub environment: Environment,
    pub log_level: String,
    /// Unit code of the relative window applied to queries without a time filter.
    pub default_time_unit: Option<String>,
    /// Amount of units of the default relative window.
    pub default_time_value: Option<u32>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: "info".to_string(),
            default_time_unit: None,
            default_time_value: None,
        }
    }
}

impl CoreConfig {
    /// Loads configuration from the process environment (`NQM_*` variables).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `QUERY_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| env::var(key).ok())
    }

    /// Builds the configuration out of an arbitrary key lookup.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |suffix: &str| format!("{}{}", prefix, suffix);

        let environment = lookup(&key("ENV"))
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let log_level = lookup(&key("LOG_LEVEL"))
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        let default_time_unit = lookup(&key("DEFAULT_TIME_UNIT"))
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());

        let value_key = key("DEFAULT_TIME_VALUE");
        let default_time_value = match lookup(&value_key) {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue {
                    key: value_key.clone(),
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        debug!(
            prefix,
            ?environment,
            log_level = %log_level,
            "loaded core configuration"
        );

        Ok(Self {
            environment,
            log_level,
            default_time_unit,
            default_time_value,
        })
    }

    /// Whether the service is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}
