// SPDX-License-Identifier: MIT

//! Loop controller
//!
//! Decides, on each arrival at a `loop` node, whether to enter the body again
//! or leave. The iteration counter lives in the run context under
//! `iterationRecord.<loopId>`; the executor writes it back after a decision.

use serde_json::{json, Value};

use super::types::{BRANCH_CONTINUE, BRANCH_EXIT};
use crate::adk::error::EvaluationError;
use crate::stepflow::workflow::expression::{branch_truth, Expression};
use crate::stepflow::workflow::state::{ExecutionState, IterationRecord};

/// Why a loop was left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The continuation expression came out false
    ConditionFalse,
    /// `maxIterations` continues were already taken
    LimitReached,
}

/// Outcome of one arrival at a loop node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    /// Enter the body; `iteration` is the new 1-based count
    Continue { iteration: u64 },
    Exit { iteration: u64, reason: ExitReason },
}

impl LoopDecision {
    pub fn branch(&self) -> &'static str {
        match self {
            LoopDecision::Continue { .. } => BRANCH_CONTINUE,
            LoopDecision::Exit { .. } => BRANCH_EXIT,
        }
    }

    pub fn iteration(&self) -> u64 {
        match self {
            LoopDecision::Continue { iteration } | LoopDecision::Exit { iteration, .. } => *iteration,
        }
    }

    /// Step result recorded for the loop node
    pub fn to_result(&self) -> Value {
        json!({ "branch": self.branch(), "iteration": self.iteration() })
    }

    /// Record to store after this decision
    pub fn record(&self, max_iterations: u64) -> IterationRecord {
        IterationRecord {
            iteration: self.iteration(),
            max_iterations,
        }
    }
}

/// Decide continue vs. exit for the loop `loop_id`.
///
/// The limit is checked before the continuation expression, so a loop never
/// takes `continue` more than `max_iterations` times whatever its body does.
pub fn decide(
    loop_id: &str,
    max_iterations: u64,
    condition: Option<&Expression>,
    state: &ExecutionState,
) -> Result<LoopDecision, EvaluationError> {
    let iteration = state
        .iteration_record(loop_id)
        .map(|r| r.iteration)
        .unwrap_or(0);

    if iteration >= max_iterations {
        log::info!(
            "Loop {} reached its limit of {} iterations, exiting",
            loop_id,
            max_iterations
        );
        return Ok(LoopDecision::Exit {
            iteration,
            reason: ExitReason::LimitReached,
        });
    }

    if let Some(expression) = condition {
        let value = expression.evaluate(state)?;
        if !branch_truth(&value) {
            log::debug!("Loop {} condition is {} after {} iterations", loop_id, value, iteration);
            return Ok(LoopDecision::Exit {
                iteration,
                reason: ExitReason::ConditionFalse,
            });
        }
    }

    Ok(LoopDecision::Continue {
        iteration: iteration + 1,
    })
}
