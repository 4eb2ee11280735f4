mod compound;
mod filter;
mod grouping;
mod time;

pub use compound::{CompoundQuery, CompoundQueryFilter, DecodeReport};
pub use filter::{normalize_metric_expression, AgentFilter, TargetFilter};
pub use grouping::{
    QueryGrouping, QueryOutput, AGENT_GROUPING_DOMAIN, AGENT_GROUPING_HOSTNAME,
    AGENT_GROUPING_IP_ADDRESS, AGENT_GROUPING_NAME, DEFAULT_OUTPUT_METRICS, GROUPING_CITY,
    GROUPING_ISP, GROUPING_NAME_TAG, GROUPING_PROVINCE, METRIC_AVG, METRIC_COUNT, METRIC_LOSS,
    METRIC_MAX, METRIC_MDEV, METRIC_MED, METRIC_MIN, METRIC_NUM_AGENT, METRIC_NUM_TARGET,
    METRIC_PCK_RECEIVED, METRIC_PCK_SENT, TARGET_GROUPING_DOMAIN, TARGET_GROUPING_HOST,
    TARGET_GROUPING_NAME,
};
pub use time::{TimeFilter, TimeRange, TimeUnit, TimeWithUnit, ZERO_INSTANT_SECONDS};

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::QueryError;
use crate::purify::kind_of;

/// Collects field-level decode problems while falling back to defaults.
#[derive(Debug, Default)]
pub(crate) struct DecodeContext {
    issues: Vec<QueryError>,
}

impl DecodeContext {
    /// Value of `result`, or the default after recording the failure under `path`.
    pub(crate) fn field<T: Default>(&mut self, path: &str, result: Result<T, QueryError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => {
                let err = err.under(path);
                warn!(field = path, error = %err, "falling back to default for invalid query field");
                self.issues.push(err);
                T::default()
            }
        }
    }

    /// Nested object at `key`; anything but an object or nothing is recorded as an issue.
    pub(crate) fn section<'a>(
        &mut self,
        parent: Option<&'a Map<String, Value>>,
        key: &str,
        path: &str,
    ) -> Option<&'a Map<String, Value>> {
        match parent.and_then(|object| object.get(key)) {
            None | Some(Value::Null) => None,
            Some(Value::Object(object)) => Some(object),
            Some(other) => {
                let reason = format!("expected an object, got {}", kind_of(other));
                self.field::<()>(path, Err(QueryError::invalid_field("", reason)));
                None
            }
        }
    }

    pub(crate) fn into_issues(self) -> Vec<QueryError> {
        self.issues
    }
}
