// SPDX-License-Identifier: MIT

//! Collaborator kit
//!
//! Contracts the engine consumes but does not implement:
//! - `AgentExecutor` - runs `agent` steps
//! - `ActionHandler` - performs `action` side effects
//! - `Persistence` - loads definitions, stores checkpoints

pub mod action;
pub mod agent;
pub mod error;
pub mod persistence;

pub use action::ActionHandler;
pub use agent::{AgentExecutor, AgentStep, UnconfiguredAgentExecutor};
pub use error::{
    ActionError, AgentExecutionError, CancelledError, DelegateError, ErrorCategory,
    EvaluationError, NodeExecutionError, StepflowError, ValidationError, ValidationIssue,
};
pub use persistence::Persistence;
