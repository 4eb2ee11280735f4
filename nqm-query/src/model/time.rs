use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::debug;

use super::DecodeContext;
use crate::error::QueryError;
use crate::purify::kind_of;

const TIME_PATH: &str = "filters.time";

/// Epoch seconds of `0001-01-01T00:00:00Z`, the instant clients send for "no time".
pub const ZERO_INSTANT_SECONDS: i64 = -62_135_596_800;

/// Calendar unit of a relative time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// Every unit, ordered by its compact index.
    pub const ALL: [TimeUnit; 6] = [
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
        TimeUnit::Month,
        TimeUnit::Year,
    ];

    /// Wire code of the unit.
    pub fn code(&self) -> &'static str {
        match self {
            TimeUnit::Minute => "m",
            TimeUnit::Hour => "h",
            TimeUnit::Day => "d",
            TimeUnit::Week => "w",
            TimeUnit::Month => "mo",
            TimeUnit::Year => "y",
        }
    }

    /// Parses a wire code; long names are accepted too.
    pub fn from_code(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "m" | "minute" => Some(TimeUnit::Minute),
            "h" | "hour" => Some(TimeUnit::Hour),
            "d" | "day" => Some(TimeUnit::Day),
            "w" | "week" => Some(TimeUnit::Week),
            "mo" | "month" => Some(TimeUnit::Month),
            "y" | "year" => Some(TimeUnit::Year),
            _ => None,
        }
    }

    pub(crate) fn index(&self) -> u8 {
        match self {
            TimeUnit::Minute => 0,
            TimeUnit::Hour => 1,
            TimeUnit::Day => 2,
            TimeUnit::Week => 3,
            TimeUnit::Month => 4,
            TimeUnit::Year => 5,
        }
    }

    pub(crate) fn from_index(index: u8) -> Option<Self> {
        TimeUnit::ALL.get(usize::from(index)).copied()
    }

    /// Start of the bucket of this unit that contains `instant`.
    fn floor(&self, instant: &DateTime<Utc>) -> Option<NaiveDateTime> {
        let date = instant.date_naive();
        match self {
            TimeUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0),
            TimeUnit::Month => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)
            }
            TimeUnit::Week => {
                let back = i64::from(date.weekday().num_days_from_monday());
                date.checked_sub_signed(Duration::days(back))?
                    .and_hms_opt(0, 0, 0)
            }
            TimeUnit::Day => date.and_hms_opt(0, 0, 0),
            TimeUnit::Hour => date.and_hms_opt(instant.hour(), 0, 0),
            TimeUnit::Minute => date.and_hms_opt(instant.hour(), instant.minute(), 0),
        }
    }

    fn step_back(&self, from: NaiveDateTime, amount: u32) -> Option<NaiveDateTime> {
        let amount_i64 = i64::from(amount);
        match self {
            TimeUnit::Year => from.checked_sub_months(Months::new(amount.checked_mul(12)?)),
            TimeUnit::Month => from.checked_sub_months(Months::new(amount)),
            TimeUnit::Week => from.checked_sub_signed(Duration::weeks(amount_i64)),
            TimeUnit::Day => from.checked_sub_signed(Duration::days(amount_i64)),
            TimeUnit::Hour => from.checked_sub_signed(Duration::hours(amount_i64)),
            TimeUnit::Minute => from.checked_sub_signed(Duration::minutes(amount_i64)),
        }
    }

    fn step_forward(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            TimeUnit::Year => from.checked_add_months(Months::new(12)),
            TimeUnit::Month => from.checked_add_months(Months::new(1)),
            TimeUnit::Week => from.checked_add_signed(Duration::weeks(1)),
            TimeUnit::Day => from.checked_add_signed(Duration::days(1)),
            TimeUnit::Hour => from.checked_add_signed(Duration::hours(1)),
            TimeUnit::Minute => from.checked_add_signed(Duration::minutes(1)),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for TimeUnit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// "`value` units back from a reference instant".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeWithUnit {
    pub unit: TimeUnit,
    pub value: u32,
}

impl TimeWithUnit {
    pub fn new(unit: TimeUnit, value: u32) -> Self {
        Self { unit, value }
    }

    /// Resolves the window against `reference` as a half-open range.
    ///
    /// A zero value means the current, still open bucket.
    pub fn resolve(&self, reference: &DateTime<Utc>) -> Result<TimeRange, QueryError> {
        let out_of_range = || {
            QueryError::TimeOutOfRange(format!(
                "{} {} back from {}",
                self.value,
                self.unit,
                reference.to_rfc3339()
            ))
        };

        let floor = self.unit.floor(reference).ok_or_else(out_of_range)?;
        let (start, end) = if self.value == 0 {
            (floor, self.unit.step_forward(floor).ok_or_else(out_of_range)?)
        } else {
            (
                self.unit
                    .step_back(floor, self.value)
                    .ok_or_else(out_of_range)?,
                floor,
            )
        };

        Ok(TimeRange {
            start: Utc.from_utc_datetime(&start),
            end: Utc.from_utc_datetime(&end),
        })
    }

    fn from_json(json: Option<&Value>) -> Result<Option<Self>, QueryError> {
        let object = match json {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(object)) => object,
            Some(other) => {
                return Err(QueryError::invalid_field(
                    "to_now",
                    format!("expected an object, got {}", kind_of(other)),
                ))
            }
        };

        let unit = match object.get("unit").and_then(Value::as_str).map(TimeUnit::from_code) {
            Some(Some(unit)) => unit,
            _ => {
                debug!(unit = ?object.get("unit"), "relative time has no known unit, leaving it unset");
                return Ok(None);
            }
        };

        let value = match object.get("value") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(number)) => match number.as_i64() {
                Some(value) if value < 0 => return Ok(None),
                Some(value) => u32::try_from(value).map_err(|_| {
                    QueryError::invalid_field("to_now.value", format!("out of range: {}", value))
                })?,
                None => {
                    return Err(QueryError::invalid_field(
                        "to_now.value",
                        format!("expected an integer, got {}", number),
                    ))
                }
            },
            Some(other) => {
                return Err(QueryError::invalid_field(
                    "to_now.value",
                    format!("expected an integer, got {}", kind_of(other)),
                ))
            }
        };

        Ok(Some(TimeWithUnit::new(unit, value)))
    }
}

/// Concrete half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Whether `instant` falls inside the window; `end` itself does not.
    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant < self.end
    }
}

/// Time window of a compound query.
///
/// Absolute instants are kept with second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeFilter {
    #[default]
    Unset,
    Absolute {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Relative(TimeWithUnit),
}

impl TimeFilter {
    /// Absolute window, truncated to whole seconds.
    pub fn absolute(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeFilter::Absolute {
            start: truncate_to_second(start),
            end: truncate_to_second(end),
        }
    }

    pub fn relative(unit: TimeUnit, value: u32) -> Self {
        TimeFilter::Relative(TimeWithUnit::new(unit, value))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, TimeFilter::Unset)
    }

    /// Concrete range of the filter, `None` while it is unset.
    pub fn resolve(&self, reference: &DateTime<Utc>) -> Result<Option<TimeRange>, QueryError> {
        match self {
            TimeFilter::Unset => Ok(None),
            TimeFilter::Absolute { start, end } => Ok(Some(TimeRange {
                start: *start,
                end: *end,
            })),
            TimeFilter::Relative(spec) => spec.resolve(reference).map(Some),
        }
    }

    /// Decodes `filters.time`.
    ///
    /// A complete, non-sentinel `start_time`/`end_time` pair wins over
    /// `to_now`. A broken field is recorded in `ctx` and treated as absent, so
    /// the remaining fields still decide the filter.
    pub(crate) fn from_json(json: Option<&Value>, ctx: &mut DecodeContext) -> Self {
        let object = match json {
            None | Some(Value::Null) => return TimeFilter::Unset,
            Some(Value::Object(object)) => object,
            Some(other) => {
                let reason = format!("expected an object, got {}", kind_of(other));
                ctx.field::<()>(TIME_PATH, Err(QueryError::invalid_field("", reason)));
                return TimeFilter::Unset;
            }
        };

        let start = ctx.field(TIME_PATH, epoch_seconds(object, "start_time"));
        let end = ctx.field(TIME_PATH, epoch_seconds(object, "end_time"));
        if let (Some(start), Some(end)) = (start, end) {
            if start != ZERO_INSTANT_SECONDS || end != ZERO_INSTANT_SECONDS {
                let range = instant_of(start, "start_time")
                    .and_then(|start| Ok((start, instant_of(end, "end_time")?)));
                if let Some((start, end)) = ctx.field(TIME_PATH, range.map(Some)) {
                    return TimeFilter::Absolute { start, end };
                }
            }
        }

        ctx.field(TIME_PATH, TimeWithUnit::from_json(object.get("to_now")))
            .map(TimeFilter::Relative)
            .unwrap_or_default()
    }
}

impl Serialize for TimeFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TimeFilter::Unset => serializer.serialize_map(Some(0))?.end(),
            TimeFilter::Absolute { start, end } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("start_time", &start.timestamp())?;
                map.serialize_entry("end_time", &end.timestamp())?;
                map.end()
            }
            TimeFilter::Relative(spec) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("to_now", spec)?;
                map.end()
            }
        }
    }
}

fn instant_of(seconds: i64, field: &str) -> Result<DateTime<Utc>, QueryError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| QueryError::invalid_field(field, format!("out of range: {}", seconds)))
}

fn epoch_seconds(object: &Map<String, Value>, field: &str) -> Result<Option<i64>, QueryError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_i64().map(Some).ok_or_else(|| {
            QueryError::invalid_field(field, format!("expected epoch seconds, got {}", number))
        }),
        Some(other) => Err(QueryError::invalid_field(
            field,
            format!("expected epoch seconds, got {}", kind_of(other)),
        )),
    }
}

fn truncate_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.with_nanosecond(0).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    fn decode(source: &Value) -> (TimeFilter, Vec<QueryError>) {
        let mut ctx = DecodeContext::default();
        let filter = TimeFilter::from_json(Some(source), &mut ctx);
        (filter, ctx.into_issues())
    }

    #[test_case(TimeUnit::Year, 2, "2012-01-01T00:00:00Z", "2014-01-01T00:00:00Z" ; "years")]
    #[test_case(TimeUnit::Year, 0, "2014-01-01T00:00:00Z", "2015-01-01T00:00:00Z" ; "current year")]
    #[test_case(TimeUnit::Month, 2, "2014-04-01T00:00:00Z", "2014-06-01T00:00:00Z" ; "months")]
    #[test_case(TimeUnit::Month, 6, "2013-12-01T00:00:00Z", "2014-06-01T00:00:00Z" ; "months across a year")]
    #[test_case(TimeUnit::Month, 0, "2014-06-01T00:00:00Z", "2014-07-01T00:00:00Z" ; "current month")]
    #[test_case(TimeUnit::Week, 2, "2014-05-26T00:00:00Z", "2014-06-09T00:00:00Z" ; "weeks")]
    #[test_case(TimeUnit::Week, 0, "2014-06-09T00:00:00Z", "2014-06-16T00:00:00Z" ; "current week")]
    #[test_case(TimeUnit::Day, 2, "2014-06-08T00:00:00Z", "2014-06-10T00:00:00Z" ; "days")]
    #[test_case(TimeUnit::Day, 10, "2014-05-31T00:00:00Z", "2014-06-10T00:00:00Z" ; "days across a month")]
    #[test_case(TimeUnit::Day, 0, "2014-06-10T00:00:00Z", "2014-06-11T00:00:00Z" ; "current day")]
    #[test_case(TimeUnit::Hour, 2, "2014-06-10T08:00:00Z", "2014-06-10T10:00:00Z" ; "hours")]
    #[test_case(TimeUnit::Hour, 11, "2014-06-09T23:00:00Z", "2014-06-10T10:00:00Z" ; "hours across a day")]
    #[test_case(TimeUnit::Hour, 0, "2014-06-10T10:00:00Z", "2014-06-10T11:00:00Z" ; "current hour")]
    #[test_case(TimeUnit::Minute, 7, "2014-06-10T10:13:00Z", "2014-06-10T10:20:00Z" ; "minutes")]
    #[test_case(TimeUnit::Minute, 25, "2014-06-10T09:55:00Z", "2014-06-10T10:20:00Z" ; "minutes across an hour")]
    #[test_case(TimeUnit::Minute, 0, "2014-06-10T10:20:00Z", "2014-06-10T10:21:00Z" ; "current minute")]
    fn resolves_relative_window(unit: TimeUnit, value: u32, start: &str, end: &str) {
        let reference = at("2014-06-10T10:20:30Z");
        let range = TimeWithUnit::new(unit, value)
            .resolve(&reference)
            .expect("resolvable");

        assert_eq!(range.start, at(start));
        assert_eq!(range.end, at(end));
    }

    #[test_case("2014-06-09T00:00:00Z", 0, "2014-06-09T00:00:00Z", "2014-06-16T00:00:00Z" ; "monday midnight is its own floor")]
    #[test_case("2014-06-09T00:00:00Z", 1, "2014-06-02T00:00:00Z", "2014-06-09T00:00:00Z" ; "week before a monday")]
    #[test_case("2014-06-15T23:59:59Z", 0, "2014-06-09T00:00:00Z", "2014-06-16T00:00:00Z" ; "sunday belongs to the prior monday")]
    #[test_case("2014-06-15T23:59:59Z", 1, "2014-06-02T00:00:00Z", "2014-06-09T00:00:00Z" ; "week before a sunday")]
    fn week_floor_boundaries(reference: &str, value: u32, start: &str, end: &str) {
        let range = TimeWithUnit::new(TimeUnit::Week, value)
            .resolve(&at(reference))
            .expect("resolvable");

        assert_eq!(range.start, at(start));
        assert_eq!(range.end, at(end));
    }

    #[test]
    fn resolved_window_is_half_open() {
        let reference = at("2014-06-10T10:20:30Z");
        let range = TimeWithUnit::new(TimeUnit::Day, 0)
            .resolve(&reference)
            .expect("resolvable");

        assert!(range.contains(&reference));
        assert!(range.contains(&range.start));
        assert!(!range.contains(&range.end));
        assert!(!range.contains(&at("2014-06-09T23:59:59Z")));
    }

    #[test]
    fn month_end_reference_floors_before_stepping() {
        let range = TimeWithUnit::new(TimeUnit::Month, 1)
            .resolve(&at("2015-03-31T23:59:59Z"))
            .unwrap();
        assert_eq!(range.start, at("2015-02-01T00:00:00Z"));
        assert_eq!(range.end, at("2015-03-01T00:00:00Z"));
    }

    #[test]
    fn huge_windows_are_out_of_range() {
        let err = TimeWithUnit::new(TimeUnit::Year, u32::MAX / 12)
            .resolve(&at("2014-06-10T10:20:30Z"))
            .unwrap_err();
        assert!(matches!(err, QueryError::TimeOutOfRange(_)));
    }

    #[test]
    fn unit_codes_round_trip() {
        for unit in TimeUnit::ALL {
            assert_eq!(TimeUnit::from_code(unit.code()), Some(unit));
            assert_eq!(TimeUnit::from_index(unit.index()), Some(unit));
        }
        assert_eq!(TimeUnit::from_code(" Month "), Some(TimeUnit::Month));
        assert_eq!(TimeUnit::from_code(""), None);
        assert_eq!(TimeUnit::from_code("q"), None);
    }

    #[test]
    fn absolute_pair_wins() {
        let (filter, issues) = decode(&json!({
            "start_time": 8977123,
            "end_time": 19082711,
            "to_now": { "unit": "d", "value": 3 }
        }));
        assert!(issues.is_empty());

        assert_eq!(
            filter,
            TimeFilter::Absolute {
                start: Utc.timestamp_opt(8977123, 0).unwrap(),
                end: Utc.timestamp_opt(19082711, 0).unwrap(),
            }
        );
    }

    #[test]
    fn relative_spec_is_read() {
        let (filter, issues) = decode(&json!({ "to_now": { "unit": "mo", "value": 3 } }));
        assert_eq!(filter, TimeFilter::relative(TimeUnit::Month, 3));
        assert!(issues.is_empty());
    }

    #[test_case(json!({}) ; "empty object")]
    #[test_case(json!({ "to_now": {} }) ; "empty relative spec")]
    #[test_case(json!({
        "start_time": ZERO_INSTANT_SECONDS,
        "end_time": ZERO_INSTANT_SECONDS,
        "to_now": { "unit": "", "value": -1 }
    }) ; "sentinel values")]
    #[test_case(json!({ "to_now": { "unit": "fortnight", "value": 2 } }) ; "unknown unit")]
    #[test_case(json!({ "to_now": { "unit": "d", "value": -1 } }) ; "negative value")]
    #[test_case(json!({ "start_time": 100 }) ; "start without end")]
    fn collapses_to_unset(source: Value) {
        let (filter, issues) = decode(&source);
        assert_eq!(filter, TimeFilter::Unset);
        assert!(issues.is_empty());
    }

    #[test]
    fn wrongly_typed_times_are_field_errors() {
        let (filter, issues) = decode(&json!({ "start_time": "yesterday", "end_time": 1 }));
        assert_eq!(filter, TimeFilter::Unset);
        assert_eq!(
            issues,
            vec![QueryError::invalid_field(
                "filters.time.start_time",
                "expected epoch seconds, got a string"
            )]
        );

        let (filter, issues) = decode(&json!([1, 2]));
        assert_eq!(filter, TimeFilter::Unset);
        assert!(matches!(
            &issues[..],
            [QueryError::InvalidFilterField { field, .. }] if field == "filters.time"
        ));
    }

    #[test]
    fn broken_epoch_field_falls_back_to_relative_spec() {
        let (filter, issues) = decode(&json!({
            "start_time": "now",
            "to_now": { "unit": "d", "value": 3 }
        }));
        assert_eq!(filter, TimeFilter::relative(TimeUnit::Day, 3));
        assert_eq!(issues.len(), 1);

        let (filter, issues) = decode(&json!({
            "start_time": 10,
            "end_time": i64::MAX,
            "to_now": { "unit": "h", "value": 2 }
        }));
        assert_eq!(filter, TimeFilter::relative(TimeUnit::Hour, 2));
        assert!(matches!(
            &issues[..],
            [QueryError::InvalidFilterField { field, .. }] if field == "filters.time.end_time"
        ));
    }

    #[test]
    fn broken_relative_value_is_reported() {
        let (filter, issues) = decode(&json!({ "to_now": { "unit": "d", "value": "3" } }));
        assert_eq!(filter, TimeFilter::Unset);
        assert!(matches!(
            &issues[..],
            [QueryError::InvalidFilterField { field, .. }] if field == "filters.time.to_now.value"
        ));
    }

    #[test]
    fn serializes_only_the_active_variant() {
        assert_eq!(serde_json::to_value(TimeFilter::Unset).unwrap(), json!({}));
        assert_eq!(
            serde_json::to_value(TimeFilter::relative(TimeUnit::Day, 17)).unwrap(),
            json!({ "to_now": { "unit": "d", "value": 17 } })
        );
        assert_eq!(
            serde_json::to_value(TimeFilter::absolute(
                Utc.timestamp_opt(2908001, 0).unwrap(),
                Utc.timestamp_opt(2909001, 0).unwrap(),
            ))
            .unwrap(),
            json!({ "start_time": 2908001, "end_time": 2909001 })
        );
    }

    #[test]
    fn unset_filter_resolves_to_nothing() {
        assert_eq!(TimeFilter::Unset.resolve(&Utc::now()).unwrap(), None);
    }
}
