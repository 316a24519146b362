// SPDX-License-Identifier: MIT

//! Typed error handling for stepflow-rs
//!
//! Errors are split by the phase that raises them: validation happens before a
//! run starts, evaluation and node execution errors happen inside a run and
//! become a node's `Failed` transition, cancellation ends a run early.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for stepflow-rs
#[derive(Debug, Error)]
pub enum StepflowError {
    /// Structural graph defects, raised at compile time only
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Expression parse/type/sandbox failure
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// An agent or action delegate failed
    #[error(transparent)]
    NodeExecution(#[from] NodeExecutionError),

    /// Run cancelled by the caller
    #[error(transparent)]
    Cancelled(#[from] CancelledError),

    /// Workflow definition or checkpoint not found in persistence
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors (invalid env values, missing settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

impl StepflowError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<&str> for StepflowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for StepflowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

/// A single violated compilation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Offending node, when the rule is about a node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Offending edge as `source -> target`, when the rule is about an edge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<String>,
    /// Stable rule identifier, e.g. `exactly-one-start`
    pub rule: String,
    /// Human readable explanation
    pub message: String,
}

impl ValidationIssue {
    pub fn node(node_id: impl Into<String>, rule: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            edge: None,
            rule: rule.to_string(),
            message: message.into(),
        }
    }

    pub fn edge(source: &str, target: &str, rule: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(source.to_string()),
            edge: Some(format!("{} -> {}", source, target)),
            rule: rule.to_string(),
            message: message.into(),
        }
    }

    pub fn graph(rule: &str, message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            edge: None,
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.edge, &self.node_id) {
            (Some(edge), _) => write!(f, "[{}] edge {}: {}", self.rule, edge, self.message),
            (None, Some(node)) => write!(f, "[{}] node '{}': {}", self.rule, node, self.message),
            (None, None) => write!(f, "[{}] {}", self.rule, self.message),
        }
    }
}

/// Structural defects found while compiling a workflow graph
#[derive(Debug, Clone, Error, PartialEq)]
#[error("workflow validation failed: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Check whether any issue violates the given rule
    pub fn has_rule(&self, rule: &str) -> bool {
        self.issues.iter().any(|i| i.rule == rule)
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Expression errors
///
/// The dry parse rejects malformed input (`Syntax`), forbidden constructs
/// (`Sandbox`), unresolvable names (`UnknownIdentifier`) and oversized input
/// (`Limit`) before anything runs. `Type` and `Function` only come out of
/// evaluation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("sandbox violation: '{0}' is not allowed in expressions")]
    Sandbox(String),

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("function {name} failed: {message}")]
    Function { name: String, message: String },

    #[error("expression too complex: {0}")]
    Limit(String),
}

impl EvaluationError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    pub fn function(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Function {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }

    /// True for errors that can only come out of evaluation
    pub fn is_runtime(&self) -> bool {
        matches!(self, Self::Type(_) | Self::Function { .. })
    }
}

/// Coarse classification of delegate failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Authentication,
    Validation,
    ResourceLimit,
    BusinessLogic,
    Unknown,
}

impl ErrorCategory {
    /// Categorize a failure from its message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["timeout", "timed out"]) {
            Self::Timeout
        } else if has(&["network", "connection"]) {
            Self::Network
        } else if has(&["unauthorized", "forbidden", "api key"]) {
            Self::Authentication
        } else if has(&["validation", "invalid"]) {
            Self::Validation
        } else if has(&["memory", "disk space"]) {
            Self::ResourceLimit
        } else if has(&["business", "logic"]) {
            Self::BusinessLogic
        } else {
            Self::Unknown
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Unknown)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::Validation => "validation",
            Self::ResourceLimit => "resource_limit",
            Self::BusinessLogic => "business_logic",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Failure reported by an Agent Executor
#[derive(Debug, Clone, Error, PartialEq)]
#[error("agent execution failed: {message}")]
pub struct AgentExecutionError {
    pub message: String,
}

impl AgentExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by an Action Handler
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error("no handler registered for action '{0}'")]
    UnknownAction(String),

    #[error("invalid parameters for action '{action}': {message}")]
    InvalidParams { action: String, message: String },

    #[error("action '{action}' failed: {message}")]
    Failed { action: String, message: String },
}

impl ActionError {
    pub fn invalid_params(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// A delegated node (`agent` or `action`) failed
#[derive(Debug, Clone, Error, PartialEq)]
#[error("node '{node_id}' failed ({category}): {source}")]
pub struct NodeExecutionError {
    pub node_id: String,
    pub category: ErrorCategory,
    #[source]
    pub source: DelegateError,
}

impl NodeExecutionError {
    pub fn new(node_id: impl Into<String>, source: DelegateError) -> Self {
        let category = ErrorCategory::classify(&source.to_string());
        Self {
            node_id: node_id.into(),
            category,
            source,
        }
    }
}

/// The collaborator error behind a `NodeExecutionError`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DelegateError {
    #[error(transparent)]
    Agent(#[from] AgentExecutionError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// The caller cancelled the run
#[derive(Debug, Clone, Error, PartialEq)]
#[error("run {run_id} was cancelled")]
pub struct CancelledError {
    pub run_id: String,
}
