use serde::Serialize;
use serde_json::{Map, Value};

use super::DecodeContext;
use crate::purify::{
    canonical_domain_values, canonical_values_preserving_order, purify_string_array_for_domain,
    purify_string_array_preserving_order,
};

pub const GROUPING_ISP: &str = "isp";
pub const GROUPING_PROVINCE: &str = "province";
pub const GROUPING_CITY: &str = "city";
pub const GROUPING_NAME_TAG: &str = "name_tag";

pub const AGENT_GROUPING_NAME: &str = "name";
pub const AGENT_GROUPING_HOSTNAME: &str = "hostname";
pub const AGENT_GROUPING_IP_ADDRESS: &str = "ip_address";

pub const TARGET_GROUPING_NAME: &str = "name";
pub const TARGET_GROUPING_HOST: &str = "host";

/// Accepted agent dimensions. The position is the compact index of a dimension.
pub const AGENT_GROUPING_DOMAIN: [&str; 7] = [
    GROUPING_ISP,
    GROUPING_PROVINCE,
    GROUPING_CITY,
    GROUPING_NAME_TAG,
    AGENT_GROUPING_NAME,
    AGENT_GROUPING_HOSTNAME,
    AGENT_GROUPING_IP_ADDRESS,
];

/// Accepted target dimensions. The position is the compact index of a dimension.
pub const TARGET_GROUPING_DOMAIN: [&str; 6] = [
    GROUPING_ISP,
    GROUPING_PROVINCE,
    GROUPING_CITY,
    GROUPING_NAME_TAG,
    TARGET_GROUPING_NAME,
    TARGET_GROUPING_HOST,
];

const AGENT_IDENTITY_DIMENSIONS: [&str; 3] = [
    AGENT_GROUPING_NAME,
    AGENT_GROUPING_HOSTNAME,
    AGENT_GROUPING_IP_ADDRESS,
];
const TARGET_IDENTITY_DIMENSIONS: [&str; 2] = [TARGET_GROUPING_NAME, TARGET_GROUPING_HOST];

pub const METRIC_MAX: &str = "max";
pub const METRIC_MIN: &str = "min";
pub const METRIC_AVG: &str = "avg";
pub const METRIC_MED: &str = "med";
pub const METRIC_MDEV: &str = "mdev";
pub const METRIC_LOSS: &str = "loss";
pub const METRIC_COUNT: &str = "count";
pub const METRIC_PCK_SENT: &str = "pck_sent";
pub const METRIC_PCK_RECEIVED: &str = "pck_received";
pub const METRIC_NUM_AGENT: &str = "num_agent";
pub const METRIC_NUM_TARGET: &str = "num_target";

/// Metrics reported when a query asks for none.
pub const DEFAULT_OUTPUT_METRICS: [&str; 11] = [
    METRIC_MAX,
    METRIC_MIN,
    METRIC_AVG,
    METRIC_MED,
    METRIC_MDEV,
    METRIC_LOSS,
    METRIC_COUNT,
    METRIC_PCK_SENT,
    METRIC_PCK_RECEIVED,
    METRIC_NUM_AGENT,
    METRIC_NUM_TARGET,
];

/// Aggregation dimensions for agents and targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct QueryGrouping {
    pub agent: Vec<String>,
    pub target: Vec<String>,
}

impl QueryGrouping {
    /// Whether one row per concrete agent is needed.
    pub fn is_for_each_agent(&self) -> bool {
        contains_any(&self.agent, &AGENT_IDENTITY_DIMENSIONS)
    }

    /// Whether one row per concrete target is needed.
    pub fn is_for_each_target(&self) -> bool {
        contains_any(&self.target, &TARGET_IDENTITY_DIMENSIONS)
    }

    pub(crate) fn from_json(object: Option<&Map<String, Value>>, ctx: &mut DecodeContext) -> Self {
        let get = |key: &str| object.and_then(|object| object.get(key));

        QueryGrouping {
            agent: ctx.field(
                "grouping.agent",
                purify_string_array_for_domain(get("agent"), Some(&AGENT_GROUPING_DOMAIN[..])),
            ),
            target: ctx.field(
                "grouping.target",
                purify_string_array_for_domain(get("target"), Some(&TARGET_GROUPING_DOMAIN[..])),
            ),
        }
    }

    pub(crate) fn canonicalize(&mut self) {
        self.agent = canonical_domain_values(self.agent.iter(), Some(&AGENT_GROUPING_DOMAIN[..]));
        self.target =
            canonical_domain_values(self.target.iter(), Some(&TARGET_GROUPING_DOMAIN[..]));
    }
}

fn contains_any(dimensions: &[String], wanted: &[&str]) -> bool {
    dimensions
        .iter()
        .any(|dimension| wanted.contains(&dimension.as_str()))
}

/// Requested metrics, in output column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct QueryOutput {
    pub metrics: Vec<String>,
}

impl QueryOutput {
    pub fn has_metric(&self, metric: &str) -> bool {
        self.metrics.iter().any(|candidate| candidate == metric)
    }

    pub(crate) fn from_json(object: Option<&Map<String, Value>>, ctx: &mut DecodeContext) -> Self {
        QueryOutput {
            metrics: ctx.field(
                "output.metrics",
                purify_string_array_preserving_order(object.and_then(|object| object.get("metrics"))),
            ),
        }
    }

    pub(crate) fn canonicalize(&mut self) {
        self.metrics = canonical_values_preserving_order(self.metrics.iter());
    }
}
