// SPDX-License-Identifier: MIT

use crate::adk::action::ActionHandler;
use crate::adk::error::ActionError;
use crate::stepflow::workflow::state::ExecutionState;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Longest pause a single `wait` step may request (one hour)
pub const MAX_WAIT_MS: u64 = 60 * 60 * 1000;

static WAIT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "ms": {
                "type": "integer",
                "description": "Milliseconds to wait"
            },
            "seconds": {
                "type": "number",
                "description": "Seconds to wait; ignored when `ms` is set"
            }
        }
    })
});

#[derive(Debug, Deserialize)]
struct WaitParams {
    #[serde(default)]
    ms: Option<u64>,
    #[serde(default)]
    seconds: Option<f64>,
}

/// Pauses the branch it sits on
pub struct WaitAction;

impl WaitAction {
    fn duration(action_type: &str, params: &Value) -> Result<Duration, ActionError> {
        let params: WaitParams = serde_json::from_value(params.clone())
            .map_err(|e| ActionError::invalid_params(action_type, e.to_string()))?;

        let ms = match (params.ms, params.seconds) {
            (Some(ms), _) => ms,
            (None, Some(secs)) if secs.is_finite() && secs >= 0.0 => (secs * 1000.0).round() as u64,
            (None, Some(secs)) => {
                return Err(ActionError::invalid_params(
                    action_type,
                    format!("'seconds' must be a non-negative number, got {}", secs),
                ))
            }
            (None, None) => {
                return Err(ActionError::invalid_params(action_type, "expected 'ms' or 'seconds'"))
            }
        };

        if ms > MAX_WAIT_MS {
            return Err(ActionError::invalid_params(
                action_type,
                format!("{}ms exceeds the {}ms limit", ms, MAX_WAIT_MS),
            ));
        }
        Ok(Duration::from_millis(ms))
    }
}

#[async_trait]
impl ActionHandler for WaitAction {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Sleeps for `ms` milliseconds (or `seconds`) and reports how long it waited."
    }

    fn schema(&self) -> &Value {
        &WAIT_SCHEMA
    }

    async fn perform(
        &self,
        action_type: &str,
        params: &Value,
        _state: &ExecutionState,
    ) -> Result<Value, ActionError> {
        let duration = Self::duration(action_type, params)?;
        log::debug!("{} sleeping {:?}", action_type, duration);
        tokio::time::sleep(duration).await;
        Ok(json!({ "waitedMs": duration.as_millis() as u64 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_params() {
        assert_eq!(
            WaitAction::duration("wait", &json!({"ms": 250})).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            WaitAction::duration("wait", &json!({"seconds": 1.5})).unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            WaitAction::duration("wait", &json!({"ms": 10, "seconds": 99})).unwrap(),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_rejects_bad_durations() {
        for params in [
            json!({}),
            json!({"ms": -1}),
            json!({"seconds": -2}),
            json!({"ms": MAX_WAIT_MS + 1}),
        ] {
            assert!(WaitAction::duration("wait", &params).is_err(), "{}", params);
        }
    }

    #[tokio::test]
    async fn test_sleeps_and_reports() {
        let state = ExecutionState::new("run", "wf", json!({}));
        let started = tokio::time::Instant::now();
        let out = WaitAction
            .perform("wait", &json!({"seconds": 0.02}), &state)
            .await
            .unwrap();
        assert_eq!(out, json!({"waitedMs": 20}));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
