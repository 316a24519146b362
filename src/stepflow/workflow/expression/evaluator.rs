// SPDX-License-Identifier: MIT

//! Expression evaluator
//!
//! Evaluates a parsed expression against a read-only view of the run state.
//! Member chains borrow from the scope; only computed values are allocated.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::borrow::Cow;

use super::ast::{BinaryOp, Callee, Expr, LogicalOp, UnaryOp, Variable};
use super::functions::{call_builtin, call_method, call_namespace, type_name};
use super::parser::is_forbidden_member;
use super::value::{
    compare, display_string, json_number, to_number, truthy, type_of, values_equal,
};
use crate::adk::error::EvaluationError;
use crate::stepflow::workflow::state::ExecutionState;

/// The names an expression can see
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    input: &'a Value,
    context: Value,
    steps: Value,
    now: DateTime<Utc>,
}

impl<'a> Scope<'a> {
    pub fn new(input: &'a Value, context: Value, steps: Value, now: DateTime<Utc>) -> Self {
        Self {
            input,
            context,
            steps,
            now,
        }
    }

    /// Snapshot the readable parts of a run
    pub fn from_state(state: &'a ExecutionState) -> Self {
        Self::new(
            &state.input_data,
            Value::Object(state.context.clone()),
            Value::Object(state.step_results.clone()),
            Utc::now(),
        )
    }

    /// Evaluate an expression to an owned value
    pub fn evaluate(&self, expr: &Expr) -> Result<Value, EvaluationError> {
        self.eval(expr).map(Cow::into_owned)
    }

    fn eval<'s>(&'s self, expr: &Expr) -> Result<Cow<'s, Value>, EvaluationError> {
        match expr {
            Expr::Literal(value) => Ok(Cow::Owned(value.clone())),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Cow::Owned(Value::Array(values)))
            }
            Expr::Variable(variable) => Ok(self.variable(*variable)),
            Expr::Member { object, property } => match self.eval(object)? {
                Cow::Borrowed(value) => Ok(member(value, property)),
                Cow::Owned(value) => Ok(Cow::Owned(member(&value, property).into_owned())),
            },
            Expr::Index { object, index } => {
                let key = self.evaluate(index)?;
                match self.eval(object)? {
                    Cow::Borrowed(value) => index_into(value, &key),
                    Cow::Owned(value) => {
                        index_into(&value, &key).map(|v| Cow::Owned(v.into_owned()))
                    }
                }
            }
            Expr::Call { callee, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = match callee {
                    Callee::Builtin(name) => call_builtin(name, &values)?,
                    Callee::Namespace(namespace, name) => {
                        call_namespace(*namespace, name, &values, self.now)?
                    }
                    Callee::Method { receiver, name } => {
                        let receiver = self.eval(receiver)?;
                        call_method(&receiver, name, &values)?
                    }
                };
                Ok(Cow::Owned(result))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                let result = match op {
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                    UnaryOp::Neg => json_number(-to_number(&value)?),
                    UnaryOp::Plus => json_number(to_number(&value)?),
                    UnaryOp::TypeOf => Value::String(type_of(&value).to_string()),
                };
                Ok(Cow::Owned(result))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r).map(Cow::Owned)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left)?;
                let take_left = match op {
                    LogicalOp::And => !truthy(&l),
                    LogicalOp::Or => truthy(&l),
                    LogicalOp::Coalesce => !l.is_null(),
                };
                if take_left {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let test = self.eval(test)?;
                if truthy(&test) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
        }
    }

    fn variable(&self, variable: Variable) -> Cow<'_, Value> {
        match variable {
            Variable::Input => Cow::Borrowed(self.input),
            Variable::Context => Cow::Borrowed(&self.context),
            Variable::Steps => Cow::Borrowed(&self.steps),
            Variable::Now => Cow::Owned(Value::String(self.now.to_rfc3339())),
            Variable::Today => Cow::Owned(Value::String(self.now.format("%Y-%m-%d").to_string())),
            Variable::Timestamp => Cow::Owned(Value::from(self.now.timestamp())),
        }
    }
}

/// Property access; missing properties read as `null`
fn member<'v>(value: &'v Value, property: &str) -> Cow<'v, Value> {
    match value {
        Value::Object(map) => map
            .get(property)
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null)),
        Value::Array(items) if property == "length" => Cow::Owned(Value::from(items.len())),
        Value::String(s) if property == "length" => Cow::Owned(Value::from(s.chars().count())),
        _ => Cow::Owned(Value::Null),
    }
}

fn index_into<'v>(value: &'v Value, key: &Value) -> Result<Cow<'v, Value>, EvaluationError> {
    if let Value::String(name) = key {
        if is_forbidden_member(name) {
            return Err(EvaluationError::Sandbox(name.clone()));
        }
    }
    let position = key
        .as_f64()
        .filter(|n| n.fract() == 0.0 && *n >= 0.0)
        .map(|n| n as usize);

    Ok(match (value, key, position) {
        (Value::Array(items), _, Some(i)) => items
            .get(i)
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null)),
        (Value::String(s), _, Some(i)) => Cow::Owned(
            s.chars()
                .nth(i)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
        ),
        (Value::Object(_), Value::String(name), _) => member(value, name),
        (Value::Object(_), Value::Number(_), _) => member(value, &display_string(key)),
        (Value::Array(_) | Value::String(_), Value::String(name), _) => member(value, name),
        _ => Cow::Owned(Value::Null),
    })
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvaluationError> {
    let result = match op {
        BinaryOp::Add => {
            if l.is_string() || r.is_string() {
                Value::String(format!("{}{}", display_string(l), display_string(r)))
            } else {
                json_number(to_number(l)? + to_number(r)?)
            }
        }
        BinaryOp::Sub => json_number(to_number(l)? - to_number(r)?),
        BinaryOp::Mul => json_number(to_number(l)? * to_number(r)?),
        BinaryOp::Div => {
            let divisor = to_number(r)?;
            if divisor == 0.0 {
                return Err(EvaluationError::type_error("division by zero"));
            }
            json_number(to_number(l)? / divisor)
        }
        BinaryOp::Rem => {
            let divisor = to_number(r)?;
            if divisor == 0.0 {
                return Err(EvaluationError::type_error("modulo by zero"));
            }
            json_number(to_number(l)? % divisor)
        }
        BinaryOp::Eq => Value::Bool(values_equal(l, r)),
        BinaryOp::NotEq => Value::Bool(!values_equal(l, r)),
        BinaryOp::Lt => Value::Bool(compare(l, r).is_some_and(|o| o.is_lt())),
        BinaryOp::Lte => Value::Bool(compare(l, r).is_some_and(|o| o.is_le())),
        BinaryOp::Gt => Value::Bool(compare(l, r).is_some_and(|o| o.is_gt())),
        BinaryOp::Gte => Value::Bool(compare(l, r).is_some_and(|o| o.is_ge())),
        BinaryOp::Contains => Value::Bool(contains(l, r)?),
        BinaryOp::In => Value::Bool(contains(r, l)?),
    };
    Ok(result)
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvaluationError> {
    match haystack {
        Value::String(s) => Ok(s.contains(display_string(needle).as_str())),
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Object(map) => Ok(map.contains_key(display_string(needle).as_str())),
        Value::Null => Ok(false),
        other => Err(EvaluationError::type_error(format!(
            "cannot search inside {}",
            type_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stepflow::workflow::expression::parser::parse;
    use chrono::TimeZone;
    use serde_json::json;

    fn eval_with(source: &str, input: Value, context: Value, steps: Value) -> Result<Value, EvaluationError> {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let scope = Scope::new(&input, context, steps, now);
        scope.evaluate(&parse(source)?)
    }

    fn eval(source: &str) -> Result<Value, EvaluationError> {
        eval_with(
            source,
            json!({"value": 75, "name": "Ada", "items": [1, 2, 3], "nested": {"flag": true}}),
            json!({"count": 2, "tags": ["a", "b"], "empty": null}),
            json!({"fetch": {"status": 200, "body": {"ok": true}}}),
        )
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("$input.value > 50").unwrap(), json!(true));
        assert_eq!(eval("$json.value <= 50").unwrap(), json!(false));
        assert_eq!(eval("$input.name == 'Ada'").unwrap(), json!(true));
        assert_eq!(eval("$input.name === 'Ada'").unwrap(), json!(true));
        assert_eq!(eval("$input.value != 75.0").unwrap(), json!(false));
        assert_eq!(eval("$input.missing > 1").unwrap(), json!(false));
    }

    #[test]
    fn test_member_chains_and_indexing() {
        assert_eq!(eval("$node.fetch.body.ok").unwrap(), json!(true));
        assert_eq!(eval("$steps['fetch'].status").unwrap(), json!(200));
        assert_eq!(eval("$input.items[1]").unwrap(), json!(2));
        assert_eq!(eval("$input.items.length").unwrap(), json!(3));
        assert_eq!(eval("$input.name.length").unwrap(), json!(3));
        assert_eq!(eval("$input.items[10]").unwrap(), Value::Null);
        assert_eq!(eval("$input.missing.deeper").unwrap(), Value::Null);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("7 % 4").unwrap(), json!(3));
        assert_eq!(eval("$context.count / 4").unwrap(), json!(0.5));
        assert_eq!(eval("-$input.value").unwrap(), json!(-75));
        assert_eq!(eval("'n=' + $context.count").unwrap(), json!("n=2"));
        assert!(matches!(eval("1 / 0"), Err(EvaluationError::Type(_))));
        assert!(matches!(eval("$input.items * 2"), Err(EvaluationError::Type(_))));
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(eval("$context.empty ?? 'default'").unwrap(), json!("default"));
        assert_eq!(eval("$context.count ?? 'default'").unwrap(), json!(2));
        assert_eq!(eval("$input.name || 'anon'").unwrap(), json!("Ada"));
        assert_eq!(eval("'' || 'anon'").unwrap(), json!("anon"));
        assert_eq!(eval("$input.nested.flag && $input.value").unwrap(), json!(75));
        assert_eq!(eval("not $input.nested.flag").unwrap(), json!(false));
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        assert_eq!(eval("false && 1 / 0").unwrap(), json!(false));
        assert_eq!(eval("true || 1 / 0").unwrap(), json!(true));
        assert_eq!(eval("true ? 'yes' : 1 / 0").unwrap(), json!("yes"));
    }

    #[test]
    fn test_conditional_tests_borrowed_values() {
        assert_eq!(eval("$input.nested.flag ? $input.name : 'none'").unwrap(), json!("Ada"));
        assert_eq!(eval("$input.missing ? 'set' : $input.items[1]").unwrap(), json!(2));
        assert_eq!(eval("$input.value > 50 ? 'high' : 'low'").unwrap(), json!("high"));
    }

    #[test]
    fn test_contains_and_in() {
        assert_eq!(eval("$context.tags contains 'a'").unwrap(), json!(true));
        assert_eq!(eval("'b' in $context.tags").unwrap(), json!(true));
        assert_eq!(eval("'count' in $context").unwrap(), json!(true));
        assert_eq!(eval("$input.name contains 'd'").unwrap(), json!(true));
        assert!(matches!(eval("1 in 5"), Err(EvaluationError::Type(_))));
    }

    #[test]
    fn test_typeof() {
        assert_eq!(eval("typeof $input.value").unwrap(), json!("number"));
        assert_eq!(eval("typeof $input.name").unwrap(), json!("string"));
        assert_eq!(eval("typeof $context.empty").unwrap(), json!("object"));
    }

    #[test]
    fn test_calls() {
        assert_eq!(eval("len($input.items)").unwrap(), json!(3));
        assert_eq!(eval("Math.max($input.value, 100)").unwrap(), json!(100));
        assert_eq!(eval("sum($input.items)").unwrap(), json!(6));
        assert_eq!(eval("$input.name.toUpperCase()").unwrap(), json!("ADA"));
        assert_eq!(eval("$context.tags.join('-')").unwrap(), json!("a-b"));
        assert_eq!(eval("String.padStart(str($context.count), 3, '0')").unwrap(), json!("002"));
        assert_eq!(eval("$today").unwrap(), json!("2024-06-01"));
        assert_eq!(eval("Date.addDays($today, 1)").unwrap(), json!("2024-06-02T00:00:00+00:00"));
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(eval("[1, 'a', $context.count]").unwrap(), json!([1, "a", 2]));
        assert_eq!(eval("[]").unwrap(), json!([]));
    }

    #[test]
    fn test_runtime_index_cannot_reach_internals() {
        assert!(matches!(
            eval("$input['constructor']"),
            Err(EvaluationError::Sandbox(_))
        ));
        assert!(matches!(
            eval("$input['__proto' + '__']"),
            Err(EvaluationError::Sandbox(_))
        ));
    }

    #[test]
    fn test_from_state_reads_state() {
        let mut state = ExecutionState::new("run", "wf", json!({"value": 10}));
        state.context.insert("limit".into(), json!(5));
        state.step_results.insert("a".into(), json!({"score": 0.9}));
        let scope = Scope::from_state(&state);
        let expr = parse("$input.value > $context.limit && $node.a.score > 0.5").unwrap();
        assert_eq!(scope.evaluate(&expr).unwrap(), json!(true));
    }
}
