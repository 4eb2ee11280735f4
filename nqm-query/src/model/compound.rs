use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use super::filter::metric_expression_from_json;
use super::{
    normalize_metric_expression, AgentFilter, DecodeContext, QueryGrouping, QueryOutput,
    TargetFilter, TimeFilter,
};
use crate::defaults::QueryDefaults;
use crate::error::QueryError;
use crate::purify::kind_of;

/// Every filter of a compound query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CompoundQueryFilter {
    pub time: TimeFilter,
    pub agent: AgentFilter,
    pub target: TargetFilter,
    /// Normalized metric predicate, empty when absent.
    pub metrics: String,
}

/// Filters, grouping and output requested by a client.
///
/// Decoding is lenient: a wrongly typed field falls back to its default and is
/// reported through [`DecodeReport::issues`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CompoundQuery {
    pub filters: CompoundQueryFilter,
    pub grouping: QueryGrouping,
    pub output: QueryOutput,
}

/// Outcome of decoding a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub query: CompoundQuery,
    /// Fields which were present but unusable and got their default instead.
    pub issues: Vec<QueryError>,
}

impl CompoundQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a JSON document, see [`CompoundQuery::decode`].
    pub fn from_json_str(raw: &str) -> Result<Self, QueryError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| QueryError::MalformedQuery(err.to_string()))?;
        Self::from_json_value(&value)
    }

    pub fn from_json_value(value: &Value) -> Result<Self, QueryError> {
        Self::decode(value).map(|report| report.query)
    }

    /// Decodes a payload, only failing when it is not a JSON object.
    pub fn decode(value: &Value) -> Result<DecodeReport, QueryError> {
        let root = value.as_object().ok_or_else(|| {
            QueryError::MalformedQuery(format!("expected an object, got {}", kind_of(value)))
        })?;

        let mut ctx = DecodeContext::default();
        let filters = ctx.section(Some(root), "filters", "filters");
        let query = CompoundQuery {
            filters: CompoundQueryFilter {
                time: {
                    let time = filters.and_then(|object| object.get("time"));
                    TimeFilter::from_json(time, &mut ctx)
                },
                agent: {
                    let section = ctx.section(filters, "agent", "filters.agent");
                    AgentFilter::from_json(section, &mut ctx)
                },
                target: {
                    let section = ctx.section(filters, "target", "filters.target");
                    TargetFilter::from_json(section, &mut ctx)
                },
                metrics: ctx.field(
                    "filters.metrics",
                    metric_expression_from_json(filters.and_then(|object| object.get("metrics"))),
                ),
            },
            grouping: {
                let section = ctx.section(Some(root), "grouping", "grouping");
                QueryGrouping::from_json(section, &mut ctx)
            },
            output: {
                let section = ctx.section(Some(root), "output", "output");
                QueryOutput::from_json(section, &mut ctx)
            },
        };

        let issues = ctx.into_issues();
        debug!(
            time = ?query.filters.time,
            issues = issues.len(),
            "decoded compound query"
        );

        Ok(DecodeReport { query, issues })
    }

    /// JSON form of the query; decoding it yields an equal query.
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Fills omitted sections with the built-in defaults.
    pub fn setup_default(&mut self) {
        self.setup_default_with(&QueryDefaults::default());
    }

    /// Fills omitted sections: an unset time window and an empty output list.
    ///
    /// Filters and grouping stay as given; empty means "everything".
    pub fn setup_default_with(&mut self, defaults: &QueryDefaults) {
        if self.filters.time.is_unset() {
            self.filters.time = TimeFilter::Relative(defaults.time);
        }
        if self.output.metrics.is_empty() {
            self.output.metrics = defaults.output_metrics.clone();
        }
    }

    /// Consuming variant of [`CompoundQuery::setup_default_with`].
    pub fn with_defaults(mut self, defaults: &QueryDefaults) -> Self {
        self.setup_default_with(defaults);
        self
    }

    /// Brings hand-built values into the form decoding produces.
    pub fn canonicalize(&mut self) {
        if let TimeFilter::Absolute { start, end } = self.filters.time {
            self.filters.time = TimeFilter::absolute(start, end);
        }
        self.filters.agent.canonicalize();
        self.filters.target.canonicalize();
        self.filters.metrics = normalize_metric_expression(&self.filters.metrics);
        self.grouping.canonicalize();
        self.output.canonicalize();
    }

    pub fn canonicalized(&self) -> Self {
        let mut query = self.clone();
        query.canonicalize();
        query
    }
}

impl<'de> Deserialize<'de> for CompoundQuery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        CompoundQuery::from_json_value(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TimeUnit, METRIC_LOSS, METRIC_MIN};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use test_case::test_case;

    fn sample_query(time: TimeFilter) -> CompoundQuery {
        CompoundQuery {
            filters: CompoundQueryFilter {
                time,
                agent: AgentFilter {
                    name: vec!["CB1".into(), "KC2".into()],
                    hostname: vec!["GA3".into(), "ZC0".into()],
                    ip_address: vec!["10.9".into(), "11.56.71.89".into()],
                    connection_id: vec!["AB@13".into(), "AC@13".into()],
                    isp_ids: vec![11, 12],
                    province_ids: vec![5, 8, 9],
                    city_ids: vec![31, 34],
                    name_tag_ids: vec![10, 19],
                    group_tag_ids: vec![45, 51],
                },
                target: TargetFilter {
                    name: vec!["CB1".into(), "KC2".into()],
                    host: vec!["GA3".into(), "ZC0".into()],
                    isp_ids: vec![13, 17],
                    province_ids: vec![24, 39, 81],
                    city_ids: vec![14, 23],
                    name_tag_ids: vec![39, 46],
                    group_tag_ids: vec![61, 63],
                },
                metrics: "$max > 100 or $min < 30".into(),
            },
            grouping: QueryGrouping {
                agent: vec!["name".into(), "province".into()],
                target: vec!["isp".into()],
            },
            output: QueryOutput {
                metrics: vec![METRIC_MIN.into(), METRIC_LOSS.into()],
            },
        }
    }

    #[test_case(TimeFilter::absolute(
        Utc.timestamp_opt(2908001, 0).unwrap(),
        Utc.timestamp_opt(2909001, 0).unwrap()
    ) ; "absolute time")]
    #[test_case(TimeFilter::relative(TimeUnit::Day, 17) ; "relative time")]
    fn json_round_trip(time: TimeFilter) {
        let sample = sample_query(time);
        let encoded = serde_json::to_string(&sample).unwrap();

        let mut decoded = CompoundQuery::from_json_str(&encoded).unwrap();
        assert_eq!(decoded, sample);

        decoded.setup_default();
        assert_eq!(decoded, sample);
    }

    #[test_case(r#"{ "filters": { "metrics": " $mAx > 20 aNd $min < 40 " } }"#, "$max > 20 and $min < 40" ; "mixed case")]
    #[test_case(r#"{ "filters": { "metrics": "" } }"#, "" ; "empty")]
    #[test_case("{}", "" ; "absent")]
    fn loads_metric_expression(raw: &str, expected: &str) {
        let query = CompoundQuery::from_json_str(raw).unwrap();
        assert_eq!(query.filters.metrics, expected);
    }

    #[test]
    fn loads_grouping_and_output() {
        let query = CompoundQuery::from_json_str(
            r#"{
                "grouping": { "agent": ["isp", "province"], "target": ["name_tag"] },
                "output": { "metrics": ["max", "min", "avg"] }
            }"#,
        )
        .unwrap();

        assert_eq!(query.grouping.agent, vec!["isp", "province"]);
        assert_eq!(query.grouping.target, vec!["name_tag"]);
        assert_eq!(query.output.metrics, vec!["max", "min", "avg"]);

        let empty = CompoundQuery::from_json_str(
            r#"{ "grouping": { "agent": [], "target": [] }, "output": { "metrics": [] } }"#,
        )
        .unwrap();
        assert_eq!(empty, CompoundQuery::default());
    }

    #[test_case("[1, 2]" ; "array root")]
    #[test_case("null" ; "null root")]
    #[test_case("{ \"filters\": " ; "truncated document")]
    fn rejects_malformed_payloads(raw: &str) {
        let err = CompoundQuery::from_json_str(raw).unwrap_err();
        assert!(matches!(err, QueryError::MalformedQuery(_)));
    }

    #[test]
    fn reports_broken_sections_and_keeps_the_rest() {
        let report = CompoundQuery::decode(&json!({
            "filters": {
                "agent": "everyone",
                "target": { "host": ["h1"] },
                "time": {
                    "start_time": "now",
                    "end_time": 10,
                    "to_now": { "unit": "d", "value": 3 }
                },
                "metrics": 5
            },
            "grouping": { "agent": ["isp"] },
            "output": 7
        }))
        .unwrap();

        let fields: Vec<String> = report
            .issues
            .iter()
            .map(|issue| match issue {
                QueryError::InvalidFilterField { field, .. } => field.clone(),
                other => panic!("unexpected issue: {other:?}"),
            })
            .collect();
        assert_eq!(
            fields,
            vec![
                "filters.time.start_time",
                "filters.agent",
                "filters.metrics",
                "output",
            ]
        );

        assert_eq!(report.query.filters.time, TimeFilter::relative(TimeUnit::Day, 3));
        assert!(report.query.filters.agent.is_empty());
        assert_eq!(report.query.filters.target.host, vec!["h1"]);
        assert_eq!(report.query.grouping.agent, vec!["isp"]);
        assert!(report.query.output.metrics.is_empty());
    }

    #[test]
    fn defaults_fill_time_and_output_once() {
        let mut query = CompoundQuery::new();
        query.setup_default();

        let defaults = QueryDefaults::default();
        assert_eq!(query.filters.time, TimeFilter::Relative(defaults.time));
        assert_eq!(query.output.metrics, defaults.output_metrics);
        assert!(query.grouping.agent.is_empty());

        let once = query.clone();
        query.setup_default();
        assert_eq!(query, once);
    }

    #[test]
    fn deserializes_through_serde() {
        let query: CompoundQuery =
            serde_json::from_value(json!({ "filters": { "agent": { "isp_ids": [3, 1, 3] } } }))
                .unwrap();
        assert_eq!(query.filters.agent.isp_ids, vec![1, 3]);
    }

    #[test]
    fn canonicalize_drops_sub_second_precision() {
        let mut query = sample_query(TimeFilter::Absolute {
            start: Utc.timestamp_opt(1_400_000_000, 500_000_000).unwrap(),
            end: Utc.timestamp_opt(1_400_086_400, 999_000_000).unwrap(),
        });
        let whole_seconds = sample_query(TimeFilter::absolute(
            Utc.timestamp_opt(1_400_000_000, 0).unwrap(),
            Utc.timestamp_opt(1_400_086_400, 0).unwrap(),
        ));
        assert_ne!(query, whole_seconds);

        query.canonicalize();
        assert_eq!(query, whole_seconds);
        assert_eq!(
            CompoundQuery::from_json_value(&query.to_json_value()).unwrap(),
            query
        );
    }

    #[test]
    fn canonicalize_matches_decoded_form() {
        let decoded = CompoundQuery::from_json_value(&sample_query(TimeFilter::Unset).to_json_value())
            .unwrap();

        let mut shuffled = sample_query(TimeFilter::Unset);
        shuffled.filters.agent.province_ids = vec![9, 5, 8, 5];
        shuffled.filters.target.host.reverse();
        shuffled.grouping.agent = vec!["PROVINCE".into(), "name".into(), "bogus".into()];
        shuffled.filters.metrics = "  $MAX > 100   or $min < 30".into();

        assert_eq!(shuffled.canonicalized(), decoded);
    }
}
