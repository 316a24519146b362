// SPDX-License-Identifier: MIT

//! `{{ expr }}` templates inside node configuration
//!
//! A string that is exactly one placeholder evaluates to the typed value of
//! its expression. Any other string renders each placeholder as text, and a
//! rendered result that looks like a JSON object or array is parsed back.

use serde_json::{Map, Value};

use super::evaluator::Scope;
use super::parser::parse;
use super::value::display_string;
use crate::adk::error::EvaluationError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'t> {
    Text(&'t str),
    Placeholder(&'t str),
}

/// Whether a string contains any placeholder
pub fn has_placeholder(text: &str) -> bool {
    text.contains(OPEN)
}

/// The expression inside a string that is exactly one placeholder
pub fn sole_placeholder(text: &str) -> Result<Option<&str>, EvaluationError> {
    match segments(text)?.as_slice() {
        [Segment::Placeholder(inner)] => Ok(Some(*inner)),
        _ => Ok(None),
    }
}

/// Dry-parse every placeholder in a string
pub fn check(text: &str) -> Result<(), EvaluationError> {
    for segment in segments(text)? {
        if let Segment::Placeholder(inner) = segment {
            parse(inner)?;
        }
    }
    Ok(())
}

/// Dry-parse every placeholder in a JSON value, returning the first failure
/// together with the dot path of the string it was found in
pub fn check_value(value: &Value) -> Result<(), (String, EvaluationError)> {
    fn walk(value: &Value, path: &mut Vec<String>) -> Result<(), (String, EvaluationError)> {
        match value {
            Value::String(text) => check(text).map_err(|e| (path.join("."), e)),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    path.push(i.to_string());
                    walk(item, path)?;
                    path.pop();
                }
                Ok(())
            }
            Value::Object(map) => {
                for (key, item) in map {
                    path.push(key.clone());
                    walk(item, path)?;
                    path.pop();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
    walk(value, &mut Vec::new())
}

/// Evaluate a single template string
pub fn render(text: &str, scope: &Scope<'_>) -> Result<Value, EvaluationError> {
    let parts = segments(text)?;
    if let [Segment::Placeholder(inner)] = parts.as_slice() {
        return scope.evaluate(&parse(inner)?);
    }
    if !parts.iter().any(|p| matches!(p, Segment::Placeholder(_))) {
        return Ok(Value::String(text.to_string()));
    }

    let mut out = String::with_capacity(text.len());
    for part in parts {
        match part {
            Segment::Text(t) => out.push_str(t),
            Segment::Placeholder(inner) => match scope.evaluate(&parse(inner)?)? {
                Value::Null => {}
                value => out.push_str(&display_string(&value)),
            },
        }
    }

    let trimmed = out.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(&out) {
            return Ok(parsed);
        }
    }
    Ok(Value::String(out))
}

/// Resolve every template string inside a JSON value
pub fn interpolate(value: &Value, scope: &Scope<'_>) -> Result<Value, EvaluationError> {
    match value {
        Value::String(text) if has_placeholder(text) => render(text, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| interpolate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), interpolate(item, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn segments(text: &str) -> Result<Vec<Segment<'_>>, EvaluationError> {
    let mut parts = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(OPEN) {
        let open = cursor + offset;
        if open > cursor {
            parts.push(Segment::Text(&text[cursor..open]));
        }
        let body_start = open + OPEN.len();
        let close = find_close(&text[body_start..])
            .map(|i| body_start + i)
            .ok_or_else(|| EvaluationError::syntax(open, "unclosed '{{'"))?;
        parts.push(Segment::Placeholder(text[body_start..close].trim()));
        cursor = close + CLOSE.len();
    }
    if cursor < text.len() {
        parts.push(Segment::Text(&text[cursor..]));
    }
    Ok(parts)
}

/// Byte offset of the first `}}` outside a string literal
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}
