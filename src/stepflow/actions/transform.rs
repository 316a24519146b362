// SPDX-License-Identifier: MIT

use crate::adk::action::ActionHandler;
use crate::adk::error::ActionError;
use crate::stepflow::workflow::state::ExecutionState;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

static TRANSFORM_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "value": {
                "description": "Any JSON value; {{ }} templates are resolved before the action runs"
            }
        },
        "required": ["value"]
    })
});

/// Reshapes data between steps.
///
/// Parameters arrive interpolated, so `{ "value": { "total": "{{ $node.a.n + 1 }}" } }`
/// already carries the computed object by the time `perform` sees it.
pub struct TransformAction;

#[async_trait]
impl ActionHandler for TransformAction {
    fn name(&self) -> &str {
        "transform"
    }

    fn description(&self) -> &str {
        "Returns its interpolated `value` parameter as the step result."
    }

    fn schema(&self) -> &Value {
        &TRANSFORM_SCHEMA
    }

    async fn perform(
        &self,
        action_type: &str,
        params: &Value,
        _state: &ExecutionState,
    ) -> Result<Value, ActionError> {
        params
            .get("value")
            .cloned()
            .ok_or_else(|| ActionError::invalid_params(action_type, "missing 'value'"))
    }
}
