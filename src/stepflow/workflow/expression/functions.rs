// SPDX-License-Identifier: MIT

//! Allow-listed functions available to expressions
//!
//! Everything callable from an expression lives in one of the tables below.
//! The parser refuses any name that is not listed here, so adding a function
//! means adding it to a table and to the matching `call_*` dispatcher.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write;

use super::ast::Namespace;
use super::value::{display_string, json_number, to_number, truthy, values_equal};
use crate::adk::error::EvaluationError;

/// Longest string `padStart` will produce
const MAX_PAD_LENGTH: usize = 10_000;

static BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "len", "str", "int", "float", "bool", "abs", "round", "min", "max", "sum",
    ]
    .into_iter()
    .collect()
});

static MATH_FUNCTIONS: &[&str] = &[
    "abs", "ceil", "floor", "round", "trunc", "sqrt", "pow", "min", "max", "sum", "avg", "clamp",
    "sign",
];

static DATE_FUNCTIONS: &[&str] = &[
    "now",
    "today",
    "timestamp",
    "parse",
    "format",
    "addDays",
    "addHours",
    "diffDays",
    "year",
    "month",
    "day",
];

static STRING_FUNCTIONS: &[&str] = &[
    "upper",
    "lower",
    "trim",
    "length",
    "includes",
    "startsWith",
    "endsWith",
    "replace",
    "split",
    "join",
    "concat",
    "substring",
    "padStart",
];

static JSON_FUNCTIONS: &[&str] = &["parse", "stringify", "get", "keys", "values"];

static METHODS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "toUpperCase",
        "toLowerCase",
        "trim",
        "includes",
        "startsWith",
        "endsWith",
        "split",
        "join",
        "indexOf",
        "slice",
        "replace",
        "toString",
        "keys",
        "toFixed",
    ]
    .into_iter()
    .collect()
});

/// Names that give access to the host or to code loading
static FORBIDDEN: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "require",
        "import",
        "eval",
        "Function",
        "process",
        "globalThis",
        "global",
        "window",
        "module",
        "exports",
        "constructor",
        "__proto__",
        "prototype",
        "function",
        "new",
        "this",
        "var",
        "let",
        "const",
        "return",
        "class",
        "delete",
        "async",
        "await",
        "yield",
        "setTimeout",
        "setInterval",
        "fetch",
    ]
    .into_iter()
    .collect()
});

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(name)
}

pub fn is_method(name: &str) -> bool {
    METHODS.contains(name)
}

pub fn is_forbidden(name: &str) -> bool {
    FORBIDDEN.contains(name)
}

pub fn namespace_has(namespace: Namespace, name: &str) -> bool {
    let table = match namespace {
        Namespace::Math => MATH_FUNCTIONS,
        Namespace::Date => DATE_FUNCTIONS,
        Namespace::String => STRING_FUNCTIONS,
        Namespace::Json => JSON_FUNCTIONS,
    };
    table.contains(&name)
}

/// Constants reachable without a call, e.g. `Math.PI`
pub fn namespace_constant(namespace: Namespace, name: &str) -> Option<Value> {
    match (namespace, name) {
        (Namespace::Math, "PI") => Some(json_number(std::f64::consts::PI)),
        (Namespace::Math, "E") => Some(json_number(std::f64::consts::E)),
        _ => None,
    }
}

// ============================================================================
// Global helpers
// ============================================================================

pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    match name {
        "len" => {
            let value = arg(name, args, 0)?;
            let n = match value {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => {
                    return Err(EvaluationError::function(
                        name,
                        format!("{} has no length", type_name(other)),
                    ))
                }
            };
            Ok(Value::from(n))
        }
        "str" => Ok(Value::String(display_string(arg(name, args, 0)?))),
        "int" => {
            let n = numeric_arg(name, args, 0)?;
            Ok(json_number(n.trunc()))
        }
        "float" => Ok(json_number(numeric_arg(name, args, 0)?)),
        "bool" => Ok(Value::Bool(truthy(arg(name, args, 0)?))),
        "abs" => Ok(json_number(numeric_arg(name, args, 0)?.abs())),
        "round" => round(name, args),
        "min" => fold_numbers(name, args, f64::min),
        "max" => fold_numbers(name, args, f64::max),
        "sum" => Ok(json_number(numbers(name, args)?.iter().sum())),
        other => Err(EvaluationError::UnknownIdentifier(other.to_string())),
    }
}

// ============================================================================
// Namespaces
// ============================================================================

pub fn call_namespace(
    namespace: Namespace,
    name: &str,
    args: &[Value],
    now: DateTime<Utc>,
) -> Result<Value, EvaluationError> {
    match namespace {
        Namespace::Math => call_math(name, args),
        Namespace::Date => call_date(name, args, now),
        Namespace::String => call_string(name, args),
        Namespace::Json => call_json(name, args),
    }
}

fn call_math(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    let qualified = format!("Math.{}", name);
    let f = qualified.as_str();
    match name {
        "abs" => Ok(json_number(numeric_arg(f, args, 0)?.abs())),
        "ceil" => Ok(json_number(numeric_arg(f, args, 0)?.ceil())),
        "floor" => Ok(json_number(numeric_arg(f, args, 0)?.floor())),
        "round" => round(f, args),
        "trunc" => Ok(json_number(numeric_arg(f, args, 0)?.trunc())),
        "sqrt" => {
            let n = numeric_arg(f, args, 0)?;
            if n < 0.0 {
                return Err(EvaluationError::function(f, "square root of a negative number"));
            }
            Ok(json_number(n.sqrt()))
        }
        "pow" => Ok(json_number(
            numeric_arg(f, args, 0)?.powf(numeric_arg(f, args, 1)?),
        )),
        "min" => fold_numbers(f, args, f64::min),
        "max" => fold_numbers(f, args, f64::max),
        "sum" => Ok(json_number(numbers(f, args)?.iter().sum())),
        "avg" => {
            let values = numbers(f, args)?;
            if values.is_empty() {
                return Ok(Value::Null);
            }
            Ok(json_number(values.iter().sum::<f64>() / values.len() as f64))
        }
        "clamp" => {
            let value = numeric_arg(f, args, 0)?;
            let low = numeric_arg(f, args, 1)?;
            let high = numeric_arg(f, args, 2)?;
            if low > high {
                return Err(EvaluationError::function(f, "lower bound exceeds upper bound"));
            }
            Ok(json_number(value.clamp(low, high)))
        }
        "sign" => {
            let n = numeric_arg(f, args, 0)?;
            Ok(json_number(if n > 0.0 {
                1.0
            } else if n < 0.0 {
                -1.0
            } else {
                0.0
            }))
        }
        other => Err(EvaluationError::UnknownIdentifier(format!("Math.{}", other))),
    }
}

fn call_date(name: &str, args: &[Value], now: DateTime<Utc>) -> Result<Value, EvaluationError> {
    let qualified = format!("Date.{}", name);
    let f = qualified.as_str();
    match name {
        "now" => Ok(Value::String(now.to_rfc3339())),
        "today" => Ok(Value::String(now.format("%Y-%m-%d").to_string())),
        "timestamp" => Ok(Value::from(now.timestamp())),
        "parse" => Ok(Value::String(date_arg(f, args, 0)?.to_rfc3339())),
        "format" => {
            let date = date_arg(f, args, 0)?;
            let pattern = string_arg(f, args, 1)?;
            let mut out = String::new();
            write!(out, "{}", date.format(pattern))
                .map_err(|_| EvaluationError::function(f, format!("invalid format '{}'", pattern)))?;
            Ok(Value::String(out))
        }
        "addDays" => {
            let date = date_arg(f, args, 0)?;
            let days = numeric_arg(f, args, 1)?;
            Ok(Value::String(shift(f, date, days * 86_400.0)?.to_rfc3339()))
        }
        "addHours" => {
            let date = date_arg(f, args, 0)?;
            let hours = numeric_arg(f, args, 1)?;
            Ok(Value::String(shift(f, date, hours * 3_600.0)?.to_rfc3339()))
        }
        "diffDays" => {
            let a = date_arg(f, args, 0)?;
            let b = date_arg(f, args, 1)?;
            Ok(Value::from((a - b).num_days()))
        }
        "year" => Ok(Value::from(date_arg(f, args, 0)?.year())),
        "month" => Ok(Value::from(date_arg(f, args, 0)?.month())),
        "day" => Ok(Value::from(date_arg(f, args, 0)?.day())),
        other => Err(EvaluationError::UnknownIdentifier(format!("Date.{}", other))),
    }
}

fn call_string(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    let qualified = format!("String.{}", name);
    let f = qualified.as_str();
    match name {
        "upper" => Ok(Value::String(text_arg(f, args, 0)?.to_uppercase())),
        "lower" => Ok(Value::String(text_arg(f, args, 0)?.to_lowercase())),
        "trim" => Ok(Value::String(text_arg(f, args, 0)?.trim().to_string())),
        "length" => Ok(Value::from(text_arg(f, args, 0)?.chars().count())),
        "includes" => Ok(Value::Bool(
            text_arg(f, args, 0)?.contains(text_arg(f, args, 1)?.as_str()),
        )),
        "startsWith" => Ok(Value::Bool(
            text_arg(f, args, 0)?.starts_with(text_arg(f, args, 1)?.as_str()),
        )),
        "endsWith" => Ok(Value::Bool(
            text_arg(f, args, 0)?.ends_with(text_arg(f, args, 1)?.as_str()),
        )),
        "replace" => {
            let text = text_arg(f, args, 0)?;
            let from = text_arg(f, args, 1)?;
            let to = text_arg(f, args, 2)?;
            Ok(Value::String(text.replace(from.as_str(), to.as_str())))
        }
        "split" => {
            let text = text_arg(f, args, 0)?;
            let separator = text_arg(f, args, 1)?;
            Ok(split(&text, &separator))
        }
        "join" => {
            let items = array_arg(f, args, 0)?;
            let separator = match args.get(1) {
                Some(v) => display_string(v),
                None => ",".to_string(),
            };
            Ok(Value::String(join(items, &separator)))
        }
        "concat" => Ok(Value::String(args.iter().map(display_string).collect())),
        "substring" => {
            let chars: Vec<char> = text_arg(f, args, 0)?.chars().collect();
            let start = (numeric_arg(f, args, 1)?.max(0.0) as usize).min(chars.len());
            let end = match args.get(2) {
                Some(_) => (numeric_arg(f, args, 2)?.max(0.0) as usize).min(chars.len()),
                None => chars.len(),
            };
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        "padStart" => {
            let text = text_arg(f, args, 0)?;
            let target = numeric_arg(f, args, 1)?.max(0.0) as usize;
            if target > MAX_PAD_LENGTH {
                return Err(EvaluationError::function(
                    f,
                    format!("target length exceeds {}", MAX_PAD_LENGTH),
                ));
            }
            let pad = match args.get(2) {
                Some(v) => display_string(v),
                None => " ".to_string(),
            };
            let current = text.chars().count();
            if pad.is_empty() || current >= target {
                return Ok(Value::String(text));
            }
            let mut prefix: String = pad.chars().cycle().take(target - current).collect();
            prefix.push_str(&text);
            Ok(Value::String(prefix))
        }
        other => Err(EvaluationError::UnknownIdentifier(format!("String.{}", other))),
    }
}

fn call_json(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    let qualified = format!("JSON.{}", name);
    let f = qualified.as_str();
    match name {
        "parse" => {
            let text = string_arg(f, args, 0)?;
            serde_json::from_str(text).map_err(|e| EvaluationError::function(f, e.to_string()))
        }
        "stringify" => {
            let value = arg(f, args, 0)?;
            serde_json::to_string(value)
                .map(Value::String)
                .map_err(|e| EvaluationError::function(f, e.to_string()))
        }
        "get" => {
            let value = arg(f, args, 0)?;
            let path = string_arg(f, args, 1)?;
            let found = lookup_path(value, path).cloned();
            Ok(found.unwrap_or_else(|| args.get(2).cloned().unwrap_or(Value::Null)))
        }
        "keys" => match arg(f, args, 0)? {
            Value::Object(map) => Ok(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            )),
            other => Err(EvaluationError::function(
                f,
                format!("expected object, got {}", type_name(other)),
            )),
        },
        "values" => match arg(f, args, 0)? {
            Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
            other => Err(EvaluationError::function(
                f,
                format!("expected object, got {}", type_name(other)),
            )),
        },
        other => Err(EvaluationError::UnknownIdentifier(format!("JSON.{}", other))),
    }
}

// ============================================================================
// Value methods
// ============================================================================

pub fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    match (receiver, name) {
        (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "includes") => {
            Ok(Value::Bool(s.contains(text_arg(name, args, 0)?.as_str())))
        }
        (Value::String(s), "startsWith") => {
            Ok(Value::Bool(s.starts_with(text_arg(name, args, 0)?.as_str())))
        }
        (Value::String(s), "endsWith") => {
            Ok(Value::Bool(s.ends_with(text_arg(name, args, 0)?.as_str())))
        }
        (Value::String(s), "split") => Ok(split(s, &text_arg(name, args, 0)?)),
        (Value::String(s), "indexOf") => {
            let needle = text_arg(name, args, 0)?;
            let index = s
                .find(needle.as_str())
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::from(index))
        }
        (Value::String(s), "slice") => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), name, args)?;
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        (Value::String(s), "replace") => {
            let from = text_arg(name, args, 0)?;
            let to = text_arg(name, args, 1)?;
            Ok(Value::String(s.replacen(from.as_str(), to.as_str(), 1)))
        }
        (Value::Array(items), "includes") => {
            let needle = arg(name, args, 0)?;
            Ok(Value::Bool(items.iter().any(|v| values_equal(v, needle))))
        }
        (Value::Array(items), "indexOf") => {
            let needle = arg(name, args, 0)?;
            let index = items
                .iter()
                .position(|v| values_equal(v, needle))
                .map(|i| i as i64)
                .unwrap_or(-1);
            Ok(Value::from(index))
        }
        (Value::Array(items), "join") => {
            let separator = match args.first() {
                Some(v) => display_string(v),
                None => ",".to_string(),
            };
            Ok(Value::String(join(items, &separator)))
        }
        (Value::Array(items), "slice") => {
            let (start, end) = slice_bounds(items.len(), name, args)?;
            Ok(Value::Array(items[start..end].to_vec()))
        }
        (Value::Array(items), "toString") => Ok(Value::String(join(items, ","))),
        (Value::Object(map), "keys") => Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        (Value::Number(n), "toFixed") => {
            let digits = match args.first() {
                Some(_) => numeric_arg(name, args, 0)?.clamp(0.0, 20.0) as usize,
                None => 0,
            };
            let value = n.as_f64().unwrap_or(0.0);
            Ok(Value::String(format!("{:.*}", digits, value)))
        }
        (value, "toString") => Ok(Value::String(display_string(value))),
        (value, _) => Err(EvaluationError::type_error(format!(
            "{} has no method '{}'",
            type_name(value),
            name
        ))),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// JS-style type name
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Walk a dot path through objects and arrays
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Value, EvaluationError> {
    args.get(index).ok_or_else(|| {
        EvaluationError::function(name, format!("missing argument {}", index + 1))
    })
}

/// Offset `date` by whole seconds, failing instead of overflowing
fn shift(name: &str, date: DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>, EvaluationError> {
    if !seconds.is_finite() {
        return Err(EvaluationError::function(name, "offset must be a finite number"));
    }
    Duration::try_seconds(seconds as i64)
        .and_then(|offset| date.checked_add_signed(offset))
        .ok_or_else(|| EvaluationError::function(name, "date out of range"))
}

fn numeric_arg(name: &str, args: &[Value], index: usize) -> Result<f64, EvaluationError> {
    to_number(arg(name, args, index)?)
        .map_err(|e| EvaluationError::function(name, e.to_string()))
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, EvaluationError> {
    match arg(name, args, index)? {
        Value::String(s) => Ok(s),
        other => Err(EvaluationError::function(
            name,
            format!("expected string, got {}", type_name(other)),
        )),
    }
}

/// Any scalar rendered as text
fn text_arg(name: &str, args: &[Value], index: usize) -> Result<String, EvaluationError> {
    Ok(display_string(arg(name, args, index)?))
}

fn array_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Vec<Value>, EvaluationError> {
    match arg(name, args, index)? {
        Value::Array(items) => Ok(items),
        other => Err(EvaluationError::function(
            name,
            format!("expected array, got {}", type_name(other)),
        )),
    }
}

/// Numbers from either a single array argument or the argument list
fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, EvaluationError> {
    let items: &[Value] = match args {
        [Value::Array(items)] => items,
        other => other,
    };
    items
        .iter()
        .map(|v| to_number(v).map_err(|e| EvaluationError::function(name, e.to_string())))
        .collect()
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    f: fn(f64, f64) -> f64,
) -> Result<Value, EvaluationError> {
    let values = numbers(name, args)?;
    match values.into_iter().reduce(f) {
        Some(n) => Ok(json_number(n)),
        None => Err(EvaluationError::function(name, "needs at least one number")),
    }
}

fn round(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    let n = numeric_arg(name, args, 0)?;
    let digits = match args.get(1) {
        Some(_) => numeric_arg(name, args, 1)?.clamp(0.0, 15.0) as i32,
        None => 0,
    };
    let factor = 10f64.powi(digits);
    Ok(json_number((n * factor).round() / factor))
}

fn split(text: &str, separator: &str) -> Value {
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        text.split(separator)
            .map(|p| Value::String(p.to_string()))
            .collect()
    };
    Value::Array(parts)
}

fn join(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(|v| match v {
            Value::Null => String::new(),
            other => display_string(other),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

/// Resolve JS-style `slice(start, end)` bounds, negatives counting from the end
fn slice_bounds(len: usize, name: &str, args: &[Value]) -> Result<(usize, usize), EvaluationError> {
    let resolve = |raw: f64| -> usize {
        let len_f = len as f64;
        let idx = if raw < 0.0 { (len_f + raw).max(0.0) } else { raw.min(len_f) };
        idx as usize
    };
    let start = match args.first() {
        Some(_) => resolve(numeric_arg(name, args, 0)?),
        None => 0,
    };
    let end = match args.get(1) {
        Some(_) => resolve(numeric_arg(name, args, 1)?),
        None => len,
    };
    Ok((start, end.max(start)))
}

/// Accepts RFC 3339, `YYYY-MM-DD` or epoch seconds
fn date_arg(name: &str, args: &[Value], index: usize) -> Result<DateTime<Utc>, EvaluationError> {
    match arg(name, args, index)? {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| EvaluationError::function(name, format!("invalid date '{}'", s)))?;
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| EvaluationError::function(name, format!("invalid date '{}'", s)))?;
            Ok(Utc.from_utc_datetime(&midnight))
        }
        Value::Number(n) => {
            let secs = n.as_f64().unwrap_or(0.0) as i64;
            Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| EvaluationError::function(name, format!("invalid timestamp {}", secs)))
        }
        other => Err(EvaluationError::function(
            name,
            format!("expected date, got {}", type_name(other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_builtins() {
        assert_eq!(call_builtin("len", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call_builtin("len", &[json!([1, 2])]).unwrap(), json!(2));
        assert_eq!(call_builtin("str", &[json!(42)]).unwrap(), json!("42"));
        assert_eq!(call_builtin("int", &[json!("7.9")]).unwrap(), json!(7));
        assert_eq!(call_builtin("bool", &[json!("")]).unwrap(), json!(false));
        assert_eq!(call_builtin("round", &[json!(2.456), json!(2)]).unwrap(), json!(2.46));
        assert_eq!(call_builtin("max", &[json!(1), json!(9), json!(4)]).unwrap(), json!(9));
        assert_eq!(call_builtin("sum", &[json!([1, 2, 3])]).unwrap(), json!(6));
        assert!(call_builtin("min", &[]).is_err());
    }

    #[test]
    fn test_math_namespace() {
        let call = |name: &str, args: &[Value]| call_namespace(Namespace::Math, name, args, now());
        assert_eq!(call("floor", &[json!(3.7)]).unwrap(), json!(3));
        assert_eq!(call("pow", &[json!(2), json!(10)]).unwrap(), json!(1024));
        assert_eq!(call("avg", &[json!([2, 4])]).unwrap(), json!(3));
        assert_eq!(call("clamp", &[json!(15), json!(0), json!(10)]).unwrap(), json!(10));
        assert_eq!(call("sign", &[json!(-3)]).unwrap(), json!(-1));
        assert!(matches!(
            call("sqrt", &[json!(-1)]),
            Err(EvaluationError::Function { .. })
        ));
    }

    #[test]
    fn test_date_namespace() {
        let call = |name: &str, args: &[Value]| call_namespace(Namespace::Date, name, args, now());
        assert_eq!(call("today", &[]).unwrap(), json!("2024-03-15"));
        assert_eq!(call("timestamp", &[]).unwrap(), json!(now().timestamp()));
        assert_eq!(
            call("format", &[json!("2024-01-02"), json!("%d/%m/%Y")]).unwrap(),
            json!("02/01/2024")
        );
        assert_eq!(
            call("diffDays", &[json!("2024-01-10"), json!("2024-01-03")]).unwrap(),
            json!(7)
        );
        assert_eq!(call("month", &[json!("2024-03-15")]).unwrap(), json!(3));
        assert!(call("parse", &[json!("not a date")]).is_err());
    }

    #[test]
    fn test_date_shift_out_of_range() {
        let call = |name: &str, args: &[Value]| call_namespace(Namespace::Date, name, args, now());
        assert_eq!(
            call("addDays", &[json!("2024-01-01"), json!(1)]).unwrap(),
            json!("2024-01-02T00:00:00+00:00")
        );
        assert!(matches!(
            call("addDays", &[json!("2024-01-01"), json!(1e12)]),
            Err(EvaluationError::Function { .. })
        ));
        assert!(matches!(
            call("addDays", &[json!("2024-01-01"), json!(1e8)]),
            Err(EvaluationError::Function { .. })
        ));
        assert!(matches!(
            call("addHours", &[json!("2024-01-01"), json!(-1e15)]),
            Err(EvaluationError::Function { .. })
        ));
    }

    #[test]
    fn test_string_namespace() {
        let call = |name: &str, args: &[Value]| call_namespace(Namespace::String, name, args, now());
        assert_eq!(call("upper", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(
            call("split", &[json!("a,b"), json!(",")]).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            call("padStart", &[json!("7"), json!(3), json!("0")]).unwrap(),
            json!("007")
        );
        assert!(call("padStart", &[json!("x"), json!(1_000_000)]).is_err());
        assert_eq!(
            call("substring", &[json!("workflow"), json!(0), json!(4)]).unwrap(),
            json!("work")
        );
    }

    #[test]
    fn test_json_namespace() {
        let call = |name: &str, args: &[Value]| call_namespace(Namespace::Json, name, args, now());
        assert_eq!(call("parse", &[json!("{\"a\":1}")]).unwrap(), json!({"a": 1}));
        assert_eq!(call("stringify", &[json!([1, 2])]).unwrap(), json!("[1,2]"));
        assert_eq!(
            call("get", &[json!({"a": {"b": [10, 20]}}), json!("a.b.1")]).unwrap(),
            json!(20)
        );
        assert_eq!(
            call("get", &[json!({}), json!("missing"), json!("fallback")]).unwrap(),
            json!("fallback")
        );
        assert!(call("parse", &[json!("{oops")]).is_err());
    }

    #[test]
    fn test_methods() {
        assert_eq!(call_method(&json!("Hi"), "toUpperCase", &[]).unwrap(), json!("HI"));
        assert_eq!(
            call_method(&json!("a-b-c"), "replace", &[json!("-"), json!("+")]).unwrap(),
            json!("a+b-c")
        );
        assert_eq!(
            call_method(&json!([1, 2, 3, 4]), "slice", &[json!(-2)]).unwrap(),
            json!([3, 4])
        );
        assert_eq!(
            call_method(&json!(["a", "b"]), "join", &[json!("/")]).unwrap(),
            json!("a/b")
        );
        assert_eq!(call_method(&json!(3.14159), "toFixed", &[json!(2)]).unwrap(), json!("3.14"));
        assert!(matches!(
            call_method(&json!(5), "toUpperCase", &[]),
            Err(EvaluationError::Type(_))
        ));
    }

    #[test]
    fn test_tables() {
        assert!(is_forbidden("require"));
        assert!(is_forbidden("constructor"));
        assert!(!is_forbidden("len"));
        assert!(namespace_has(Namespace::Math, "max"));
        assert!(!namespace_has(Namespace::Math, "random"));
        assert_eq!(
            namespace_constant(Namespace::Math, "PI"),
            Some(json!(std::f64::consts::PI))
        );
    }
}
