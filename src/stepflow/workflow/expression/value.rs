// SPDX-License-Identifier: MIT

//! Coercions shared by the evaluator and the function tables

use serde_json::{Number, Value};
use std::cmp::Ordering;

use crate::adk::error::EvaluationError;

/// Largest integer an f64 represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Build a JSON number, preferring integers when the value is integral
pub fn json_number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Truthiness used inside expressions (`!`, `&&`, `||`, `?:`)
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Coercion of a routing decision to a branch
///
/// `true`, non-zero numbers and non-empty arrays or objects select the `true`
/// branch. Strings, `null` and empty collections select `false`.
pub fn branch_truth(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null | Value::String(_) => false,
    }
}

/// Numeric view of a value for arithmetic
pub fn to_number(value: &Value) -> Result<f64, EvaluationError> {
    match value {
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed.parse::<f64>().map_err(|_| {
                EvaluationError::type_error(format!("cannot convert '{}' to a number", s))
            })
        }
        Value::Array(_) => Err(EvaluationError::type_error("cannot convert array to a number")),
        Value::Object(_) => Err(EvaluationError::type_error(
            "cannot convert object to a number",
        )),
    }
}

/// Text form used by `str()`, string concatenation and method arguments
pub fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => match json_number(f) {
                Value::Number(normalized) => normalized.to_string(),
                _ => f.to_string(),
            },
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Structural equality that ignores the integer/float distinction
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Ordering for relational operators
///
/// Only numbers with numbers and strings with strings are ordered; any other
/// pairing compares as unordered and every relational test on it is false.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => {
            x.as_f64()?.partial_cmp(&y.trim().parse::<f64>().ok()?)
        }
        (Value::String(x), Value::Number(y)) => {
            x.trim().parse::<f64>().ok()?.partial_cmp(&y.as_f64()?)
        }
        _ => None,
    }
}

/// JS `typeof`
pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
    }
}
