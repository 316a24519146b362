// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;

use super::error::ActionError;
use crate::stepflow::workflow::state::ExecutionState;

/// Trait for side effects that `action` nodes can perform.
///
/// # Notes
/// - `name()` and `description()` return `&str` to avoid allocation on every call
/// - `schema()` returns `&Value`; implementations keep it in a static
/// - The engine is agnostic to what the effect does; timeouts are the
///   handler's responsibility and surface as an `Err`
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Returns the action type this handler serves (unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the action does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the action's parameters
    fn schema(&self) -> &Value;

    /// Perform the action with already-interpolated parameters
    async fn perform(
        &self,
        action_type: &str,
        params: &Value,
        state: &ExecutionState,
    ) -> Result<Value, ActionError>;
}
