use nqm_core::{ConfigError, CoreConfig};

use crate::model::{TimeUnit, TimeWithUnit, DEFAULT_OUTPUT_METRICS};

/// Values [`CompoundQuery::setup_default_with`](crate::model::CompoundQuery::setup_default_with) fills in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefaults {
    /// Relative window used when a query carries no time filter.
    pub time: TimeWithUnit,
    /// Output metrics used when a query requests none.
    pub output_metrics: Vec<String>,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            time: TimeWithUnit::new(TimeUnit::Day, 1),
            output_metrics: DEFAULT_OUTPUT_METRICS
                .iter()
                .map(|metric| metric.to_string())
                .collect(),
        }
    }
}

impl QueryDefaults {
    /// Built-in defaults with the time window overridden by the configuration.
    pub fn from_config(config: &CoreConfig) -> Result<Self, ConfigError> {
        let mut defaults = Self::default();

        if let Some(raw) = config.default_time_unit.as_deref() {
            defaults.time.unit =
                TimeUnit::from_code(raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: "DEFAULT_TIME_UNIT".to_string(),
                    value: raw.to_string(),
                })?;
        }
        if let Some(value) = config.default_time_value {
            defaults.time.value = value;
        }

        Ok(defaults)
    }
}
