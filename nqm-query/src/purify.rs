//! Canonicalization of raw JSON arrays.
//!
//! Every purifier treats an absent value or `null` as an empty array. A value
//! of the wrong shape is reported as [`QueryError::InvalidFilterField`] with an
//! empty field name; callers scope it to the JSON path they were reading.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::error::QueryError;

/// Reads an array of integer literals as `T`, deduplicated and sorted ascending.
pub fn purify_number_array<T>(json: Option<&Value>) -> Result<Vec<T>, QueryError>
where
    T: TryFrom<i64> + TryFrom<u64> + Ord + Copy,
{
    let numbers = array_elements(json)?
        .iter()
        .map(number_element::<T>)
        .collect::<Result<Vec<T>, _>>()?;

    Ok(canonical_numbers(numbers))
}

/// Trims every string, drops blanks and duplicates, sorts by code point.
pub fn purify_string_array_for_values(json: Option<&Value>) -> Result<Vec<String>, QueryError> {
    Ok(canonical_values(string_elements(json)?))
}

/// Trims and lowercases every string, keeping only members of `domain`.
///
/// The output is sorted by code point so it can feed the query digest. A
/// missing or empty domain always yields an empty array.
pub fn purify_string_array_for_domain(
    json: Option<&Value>,
    domain: Option<&[&str]>,
) -> Result<Vec<String>, QueryError> {
    Ok(canonical_domain_values(string_elements(json)?, domain))
}

/// Trims every string and drops blanks and duplicates, keeping first-occurrence order.
pub fn purify_string_array_preserving_order(
    json: Option<&Value>,
) -> Result<Vec<String>, QueryError> {
    Ok(canonical_values_preserving_order(string_elements(json)?))
}

/// Deduplicated, ascending copy of `numbers`.
pub fn canonical_numbers<T: Ord>(numbers: impl IntoIterator<Item = T>) -> Vec<T> {
    numbers
        .into_iter()
        .collect::<BTreeSet<T>>()
        .into_iter()
        .collect()
}

/// Canonical form of a free-form string set.
pub fn canonical_values<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|value| non_blank(value.as_ref()))
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Canonical form of a string set restricted to `domain`.
pub fn canonical_domain_values<I, S>(values: I, domain: Option<&[&str]>) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let domain = match domain {
        Some(domain) if !domain.is_empty() => domain,
        _ => return Vec::new(),
    };

    values
        .into_iter()
        .map(|value| value.as_ref().trim().to_lowercase())
        .filter(|lowered| domain.contains(&lowered.as_str()))
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Trimmed, non-blank, first-occurrence-deduplicated copy of `values`.
pub fn canonical_values_preserving_order<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter_map(|value| non_blank(value.as_ref()))
        .filter(|value| seen.insert(value.clone()))
        .collect()
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn string_elements(json: Option<&Value>) -> Result<Vec<&str>, QueryError> {
    array_elements(json)?.iter().map(string_element).collect()
}

fn array_elements(json: Option<&Value>) -> Result<&[Value], QueryError> {
    match json {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(other) => Err(QueryError::invalid_field(
            "",
            format!("expected an array, got {}", kind_of(other)),
        )),
    }
}

fn number_element<T>(element: &Value) -> Result<T, QueryError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let number = match element {
        Value::Number(number) => number,
        other => {
            return Err(QueryError::invalid_field(
                "",
                format!("expected an integer element, got {}", kind_of(other)),
            ))
        }
    };

    let converted = if let Some(signed) = number.as_i64() {
        <T as TryFrom<i64>>::try_from(signed).ok()
    } else if let Some(unsigned) = number.as_u64() {
        <T as TryFrom<u64>>::try_from(unsigned).ok()
    } else {
        None
    };

    converted.ok_or_else(|| {
        QueryError::invalid_field("", format!("integer element out of range: {}", number))
    })
}

fn string_element(element: &Value) -> Result<&str, QueryError> {
    element.as_str().ok_or_else(|| {
        QueryError::invalid_field(
            "",
            format!("expected a string element, got {}", kind_of(element)),
        )
    })
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
