use serde::Serialize;
use serde_json::{Map, Value};

use super::DecodeContext;
use crate::error::QueryError;
use crate::purify::{
    canonical_numbers, canonical_values, kind_of, purify_number_array,
    purify_string_array_for_values,
};

/// Filter over the probing agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct AgentFilter {
    pub name: Vec<String>,
    pub hostname: Vec<String>,
    pub ip_address: Vec<String>,
    pub connection_id: Vec<String>,
    pub isp_ids: Vec<i16>,
    pub province_ids: Vec<i16>,
    pub city_ids: Vec<i16>,
    pub name_tag_ids: Vec<i16>,
    pub group_tag_ids: Vec<i32>,
}

impl AgentFilter {
    pub(crate) fn from_json(object: Option<&Map<String, Value>>, ctx: &mut DecodeContext) -> Self {
        let get = |key: &str| object.and_then(|object| object.get(key));

        AgentFilter {
            name: ctx.field("filters.agent.name", purify_string_array_for_values(get("name"))),
            hostname: ctx.field(
                "filters.agent.hostname",
                purify_string_array_for_values(get("hostname")),
            ),
            ip_address: ctx.field(
                "filters.agent.ip_address",
                purify_string_array_for_values(get("ip_address")),
            ),
            connection_id: ctx.field(
                "filters.agent.connection_id",
                purify_string_array_for_values(get("connection_id")),
            ),
            isp_ids: ctx.field("filters.agent.isp_ids", purify_number_array(get("isp_ids"))),
            province_ids: ctx.field(
                "filters.agent.province_ids",
                purify_number_array(get("province_ids")),
            ),
            city_ids: ctx.field("filters.agent.city_ids", purify_number_array(get("city_ids"))),
            name_tag_ids: ctx.field(
                "filters.agent.name_tag_ids",
                purify_number_array(get("name_tag_ids")),
            ),
            group_tag_ids: ctx.field(
                "filters.agent.group_tag_ids",
                purify_number_array(get("group_tag_ids")),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &AgentFilter::default()
    }

    pub(crate) fn canonicalize(&mut self) {
        for set in [
            &mut self.name,
            &mut self.hostname,
            &mut self.ip_address,
            &mut self.connection_id,
        ] {
            *set = canonical_values(set.iter());
        }
        for set in [
            &mut self.isp_ids,
            &mut self.province_ids,
            &mut self.city_ids,
            &mut self.name_tag_ids,
        ] {
            *set = canonical_numbers(set.iter().copied());
        }
        self.group_tag_ids = canonical_numbers(self.group_tag_ids.iter().copied());
    }
}

/// Filter over the probed targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TargetFilter {
    pub name: Vec<String>,
    pub host: Vec<String>,
    pub isp_ids: Vec<i16>,
    pub province_ids: Vec<i16>,
    pub city_ids: Vec<i16>,
    pub name_tag_ids: Vec<i16>,
    pub group_tag_ids: Vec<i32>,
}

impl TargetFilter {
    pub(crate) fn from_json(object: Option<&Map<String, Value>>, ctx: &mut DecodeContext) -> Self {
        let get = |key: &str| object.and_then(|object| object.get(key));

        TargetFilter {
            name: ctx.field("filters.target.name", purify_string_array_for_values(get("name"))),
            host: ctx.field("filters.target.host", purify_string_array_for_values(get("host"))),
            isp_ids: ctx.field("filters.target.isp_ids", purify_number_array(get("isp_ids"))),
            province_ids: ctx.field(
                "filters.target.province_ids",
                purify_number_array(get("province_ids")),
            ),
            city_ids: ctx.field("filters.target.city_ids", purify_number_array(get("city_ids"))),
            name_tag_ids: ctx.field(
                "filters.target.name_tag_ids",
                purify_number_array(get("name_tag_ids")),
            ),
            group_tag_ids: ctx.field(
                "filters.target.group_tag_ids",
                purify_number_array(get("group_tag_ids")),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &TargetFilter::default()
    }

    pub(crate) fn canonicalize(&mut self) {
        for set in [&mut self.name, &mut self.host] {
            *set = canonical_values(set.iter());
        }
        for set in [
            &mut self.isp_ids,
            &mut self.province_ids,
            &mut self.city_ids,
            &mut self.name_tag_ids,
        ] {
            *set = canonical_numbers(set.iter().copied());
        }
        self.group_tag_ids = canonical_numbers(self.group_tag_ids.iter().copied());
    }
}

/// Lowercases the metric predicate and collapses its whitespace.
///
/// `" $mAx > 20 aNd $min < 40 "` becomes `"$max > 20 and $min < 40"`.
pub fn normalize_metric_expression(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn metric_expression_from_json(json: Option<&Value>) -> Result<String, QueryError> {
    match json {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(raw)) => Ok(normalize_metric_expression(raw)),
        Some(other) => Err(QueryError::invalid_field(
            "",
            format!("expected a string, got {}", kind_of(other)),
        )),
    }
}
