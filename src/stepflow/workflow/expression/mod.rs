// SPDX-License-Identifier: MIT

//! Sandboxed expression language
//!
//! Expressions drive condition routing, loop continuation and `{{ }}`
//! parameter templates. They can only read the run's input, context and step
//! results plus a fixed set of pure helpers:
//!
//! ```text
//! $input.value > 50
//! $context.attempts < 3 && $node.fetch.status == 200
//! len($input.items) > 0 ? 'has-items' : 'empty'
//! Math.max($context.score, 0.5)
//! ```
//!
//! Parsing and evaluation are separate steps: [`Expression::parse`] rejects
//! malformed or forbidden input before anything runs.

mod ast;
mod evaluator;
mod functions;
mod lexer;
mod parser;
pub mod template;
mod value;

pub use ast::{BinaryOp, Callee, Expr, LogicalOp, Namespace, UnaryOp, Variable};
pub use evaluator::Scope;
pub use parser::{parse, MAX_DEPTH, MAX_SOURCE_LENGTH};
pub use template::{interpolate, render};
pub use value::{branch_truth, truthy};

use serde_json::Value;

use crate::adk::error::EvaluationError;
use crate::stepflow::workflow::state::ExecutionState;

/// A parsed expression together with the source it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression written either bare or wrapped in `{{ }}`
    pub fn parse(source: &str) -> Result<Self, EvaluationError> {
        let inner = template::sole_placeholder(source)?.unwrap_or(source.trim());
        Ok(Self {
            source: source.to_string(),
            ast: parse(inner)?,
        })
    }

    /// The text this expression was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against the current run state
    pub fn evaluate(&self, state: &ExecutionState) -> Result<Value, EvaluationError> {
        Scope::from_state(state).evaluate(&self.ast)
    }

    pub fn evaluate_in(&self, scope: &Scope<'_>) -> Result<Value, EvaluationError> {
        scope.evaluate(&self.ast)
    }
}

/// Parse and evaluate in one step
pub fn evaluate(source: &str, state: &ExecutionState) -> Result<Value, EvaluationError> {
    Expression::parse(source)?.evaluate(state)
}
