// SPDX-License-Identifier: MIT

//! Conditional routing for `condition` nodes

use serde_json::Value;

use super::types::{BRANCH_FALSE, BRANCH_TRUE};
use crate::adk::error::EvaluationError;
use crate::stepflow::workflow::expression::{branch_truth, Expression};
use crate::stepflow::workflow::state::ExecutionState;

/// The branch a condition node picked
#[derive(Debug, Clone, PartialEq)]
pub struct BranchDecision {
    /// `"true"` or `"false"`
    pub branch: &'static str,
    /// Raw value the expression evaluated to
    pub value: Value,
}

/// Evaluate the condition once and pick exactly one branch.
///
/// Coercion: `true`, a non-zero number, a non-empty array or object select
/// `"true"`; anything else, strings included, selects `"false"`.
pub fn route(expression: &Expression, state: &ExecutionState) -> Result<BranchDecision, EvaluationError> {
    let value = expression.evaluate(state)?;
    let branch = if branch_truth(&value) {
        BRANCH_TRUE
    } else {
        BRANCH_FALSE
    };
    log::debug!("Condition '{}' evaluated to {} -> {}", expression.source(), value, branch);
    Ok(BranchDecision { branch, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(input: Value) -> ExecutionState {
        ExecutionState::new("run", "wf", input)
    }

    fn branch(source: &str, input: Value) -> &'static str {
        route(&Expression::parse(source).unwrap(), &state(input))
            .unwrap()
            .branch
    }

    #[test]
    fn test_comparison_routes() {
        assert_eq!(branch("{{ $input.value > 50 }}", json!({"value": 75})), "true");
        assert_eq!(branch("{{ $input.value > 50 }}", json!({"value": 10})), "false");
    }

    #[test]
    fn test_coercion_rule() {
        assert_eq!(branch("$input.items", json!({"items": [1]})), "true");
        assert_eq!(branch("$input.items", json!({"items": []})), "false");
        assert_eq!(branch("$input.obj", json!({"obj": {"a": 1}})), "true");
        assert_eq!(branch("$input.obj", json!({"obj": {}})), "false");
        assert_eq!(branch("$input.n", json!({"n": -2})), "true");
        assert_eq!(branch("$input.n", json!({"n": 0})), "false");
        assert_eq!(branch("$input.missing", json!({})), "false");
        assert_eq!(branch("$input.s", json!({"s": "yes"})), "false");
    }

    #[test]
    fn test_runtime_failure_surfaces() {
        let expr = Expression::parse("$input.value / 0").unwrap();
        let err = route(&expr, &state(json!({"value": 1}))).unwrap_err();
        assert!(err.is_runtime());
    }

    #[test]
    fn test_decision_keeps_value() {
        let expr = Expression::parse("len($input.items)").unwrap();
        let decision = route(&expr, &state(json!({"items": [1, 2]}))).unwrap();
        assert_eq!(decision.value, json!(2));
        assert_eq!(decision.branch, BRANCH_TRUE);
    }
}
