// SPDX-License-Identifier: MIT

//! Persistence contract
//!
//! The engine loads definitions and stores run checkpoints through this trait.
//! Storage layout is up to the implementation.

use async_trait::async_trait;

use super::error::StepflowError;
use crate::stepflow::workflow::state::ExecutionState;
use crate::stepflow::workflow::types::WorkflowDefinition;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Load a workflow definition by id
    async fn load_definition(&self, id: &str) -> Result<WorkflowDefinition, StepflowError>;

    /// Store a snapshot of a run's state, replacing any previous one
    async fn save_checkpoint(&self, run_id: &str, state: &ExecutionState)
        -> Result<(), StepflowError>;

    /// Fetch the latest snapshot of a run
    async fn load_checkpoint(&self, run_id: &str) -> Result<ExecutionState, StepflowError>;
}
