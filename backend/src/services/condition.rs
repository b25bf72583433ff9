//! Single-field condition evaluation against a fact map.
//!
//! Evaluation never fails: missing fields, type mismatches and unknown
//! operators all evaluate to `false` (except `not_equals`/`not_contains`,
//! which are the negation of a failed positive test).

use crate::models::{Condition, FactMap, Logic, Operator};
use serde_json::Value as JsonValue;

/// Evaluate one condition. An absent field is "undefined": it equals no
/// literal, is not numeric and contains nothing.
pub fn evaluate(condition: &Condition, facts: &FactMap) -> bool {
    let actual = facts.get(&condition.field);
    let expected = &condition.value;

    match condition.operator {
        Operator::Equals => actual.is_some_and(|a| strict_equals(a, expected)),
        Operator::NotEquals => !actual.is_some_and(|a| strict_equals(a, expected)),
        Operator::GreaterThan => compare_numeric(actual, expected, |a, b| a > b),
        Operator::LessThan => compare_numeric(actual, expected, |a, b| a < b),
        Operator::GreaterThanOrEqual => compare_numeric(actual, expected, |a, b| a >= b),
        Operator::LessThanOrEqual => compare_numeric(actual, expected, |a, b| a <= b),
        Operator::Contains => contains(actual, expected).unwrap_or(false),
        Operator::NotContains => contains(actual, expected).map(|c| !c).unwrap_or(true),
        Operator::Unknown => false,
    }
}

/// Combine a condition list with AND/OR. An empty AND list holds, an empty
/// OR list does not.
pub fn evaluate_all(conditions: &[Condition], logic: Logic, facts: &FactMap) -> bool {
    match logic {
        Logic::And => conditions.iter().all(|c| evaluate(c, facts)),
        Logic::Or => conditions.iter().any(|c| evaluate(c, facts)),
    }
}

/// Type-sensitive equality: `30` never equals `"30"`, but `30` equals `30.0`.
fn strict_equals(actual: &JsonValue, expected: &JsonValue) -> bool {
    match (actual, expected) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Ordering comparisons only apply when both sides are numbers
fn compare_numeric(
    actual: Option<&JsonValue>,
    expected: &JsonValue,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (actual.and_then(JsonValue::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// `None` when the actual value is neither a string nor a list
fn contains(actual: Option<&JsonValue>, expected: &JsonValue) -> Option<bool> {
    match actual? {
        JsonValue::String(haystack) => Some(haystack.contains(needle_text(expected).as_str())),
        JsonValue::Array(items) => Some(items.iter().any(|item| strict_equals(item, expected))),
        _ => None,
    }
}

fn needle_text(expected: &JsonValue) -> String {
    match expected {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
