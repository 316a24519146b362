// SPDX-License-Identifier: MIT

//! Agent Executor contract
//!
//! `agent` nodes hand their interpolated configuration to an `AgentExecutor`.
//! The engine never talks to an LLM provider itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AgentExecutionError;
use crate::stepflow::workflow::state::ExecutionState;

/// What an agent node asks the executor to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    /// Id of the node being executed
    pub node_id: String,
    /// Optional display label of the node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Node configuration with every `{{ }}` template resolved
    pub config: Value,
}

/// Executes agent steps on behalf of the engine
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Produce a result for the step, or fail
    async fn execute(
        &self,
        step: &AgentStep,
        state: &ExecutionState,
    ) -> Result<Value, AgentExecutionError>;
}

/// Agent executor used when a workflow has no agent nodes to serve
///
/// Every call fails, which surfaces as the node's `Failed` transition.
pub struct UnconfiguredAgentExecutor;

#[async_trait]
impl AgentExecutor for UnconfiguredAgentExecutor {
    async fn execute(
        &self,
        step: &AgentStep,
        _state: &ExecutionState,
    ) -> Result<Value, AgentExecutionError> {
        Err(AgentExecutionError::new(format!(
            "no agent executor configured for node '{}'",
            step.node_id
        )))
    }
}
