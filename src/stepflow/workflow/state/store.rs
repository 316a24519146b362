// SPDX-License-Identifier: MIT

//! Runtime state threaded through a single workflow run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::schema::{ReducerType, StateSchema};
use crate::adk::error::ErrorCategory;

/// Context key under which loop iteration records live
pub const ITERATION_RECORD_KEY: &str = "iterationRecord";
/// Context key under which node failures are recorded for error handlers
pub const ERRORS_KEY: &str = "errors";

/// The single mutable record of one run
///
/// Owned by exactly one in-flight run. Node handlers only ever see it through
/// a shared borrow; the executor mutates it between dispatch rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    /// Append-only trace of executed steps, in completion order
    pub messages: Vec<StepMessage>,
    /// Shared scratch space written by nodes
    pub context: Map<String, Value>,
    /// Immutable initial payload
    pub input_data: Value,
    pub completed_steps: BTreeSet<String>,
    pub failed_steps: BTreeSet<String>,
    pub skipped_steps: BTreeSet<String>,
    /// Node id to its latest output
    pub step_results: Map<String, Value>,
    /// Terminal error of the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub metadata: RunMetadata,
}

/// Outcome recorded for one executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// One entry of the execution trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMessage {
    /// Node id
    pub id: String,
    pub node_type: String,
    pub status: StepStatus,
    /// Resolved input the node ran with
    pub input: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Enclosing loop iteration, when the node ran inside a loop body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// What ended a run unsuccessfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Evaluation,
    NodeExecution,
    Cancelled,
    Incomplete,
}

/// Terminal error descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub kind: ExecutionErrorKind,
    pub category: ErrorCategory,
    pub message: String,
}

/// Run bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default)]
    pub cancelled: bool,
    /// Non-error events worth surfacing, e.g. loop limits
    #[serde(default)]
    pub notes: Vec<MetadataNote>,
    /// Compile warnings of the definition that ran
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// A bounded-termination event, never an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MetadataNote {
    #[serde(rename_all = "camelCase")]
    LoopLimitReached {
        node_id: String,
        iteration: u64,
        max_iterations: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Per-loop counter stored in the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iteration: u64,
    pub max_iterations: u64,
}

impl ExecutionState {
    /// Create the state for a new run
    pub fn new(run_id: &str, workflow_name: &str, input_data: Value) -> Self {
        Self {
            messages: Vec::new(),
            context: Map::new(),
            input_data,
            completed_steps: BTreeSet::new(),
            failed_steps: BTreeSet::new(),
            skipped_steps: BTreeSet::new(),
            step_results: Map::new(),
            error: None,
            metadata: RunMetadata {
                run_id: run_id.to_string(),
                workflow_name: workflow_name.to_string(),
                started_at: Utc::now(),
                completed_at: None,
                success: false,
                cancelled: false,
                notes: Vec::new(),
                warnings: Vec::new(),
            },
        }
    }

    /// Seed schema defaults into the context
    pub fn seed_defaults(&mut self, schema: &StateSchema) {
        for (name, value) in schema.defaults() {
            self.context.insert(name.to_string(), value.clone());
        }
    }

    /// Write a context key using the given reducer
    pub fn update_context(&mut self, key: &str, value: Value, reducer: ReducerType) {
        match reducer {
            ReducerType::Overwrite => {
                self.context.insert(key.to_string(), value);
            }
            ReducerType::Append => {
                let arr = self
                    .context
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if !arr.is_array() {
                    let existing = arr.take();
                    *arr = Value::Array(vec![existing]);
                }
                if let Value::Array(a) = arr {
                    match value {
                        Value::Array(new_items) => a.extend(new_items),
                        other => a.push(other),
                    }
                }
            }
            ReducerType::Max => {
                let current = self.context.get(key).and_then(|v| v.as_f64());
                if let Some(new) = value.as_f64() {
                    if current.map_or(true, |c| new > c) {
                        self.context.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Min => {
                let current = self.context.get(key).and_then(|v| v.as_f64());
                if let Some(new) = value.as_f64() {
                    if current.map_or(true, |c| new < c) {
                        self.context.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Merge => {
                let current = self
                    .context
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                match (current, value) {
                    (Value::Object(current_obj), Value::Object(new_obj)) => {
                        for (k, v) in new_obj {
                            current_obj.insert(k, v);
                        }
                    }
                    (current, other) => *current = other,
                }
            }
        }
    }

    /// Get a nested context value using dot notation (e.g., "result.intent")
    pub fn context_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.context.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    /// Read the iteration record of a loop node
    pub fn iteration_record(&self, loop_id: &str) -> Option<IterationRecord> {
        let raw = self.context.get(ITERATION_RECORD_KEY)?.get(loop_id)?;
        serde_json::from_value(raw.clone()).ok()
    }

    /// Store the iteration record of a loop node
    pub fn set_iteration_record(&mut self, loop_id: &str, record: IterationRecord) {
        let records = self
            .context
            .entry(ITERATION_RECORD_KEY.to_string())
            .or_insert(Value::Object(Map::new()));
        if !records.is_object() {
            *records = Value::Object(Map::new());
        }
        if let Value::Object(map) = records {
            map.insert(loop_id.to_string(), json!(record));
        }
    }

    /// Record a node failure where a wired error handler can read it
    pub fn record_failure(&mut self, node_id: &str, category: ErrorCategory, message: &str) {
        let errors = self
            .context
            .entry(ERRORS_KEY.to_string())
            .or_insert(Value::Object(Map::new()));
        if !errors.is_object() {
            *errors = Value::Object(Map::new());
        }
        if let Value::Object(map) = errors {
            map.insert(
                node_id.to_string(),
                json!({ "nodeId": node_id, "category": category, "message": message }),
            );
        }
    }

    /// Failure recorded for a node, if any
    pub fn failure_of(&self, node_id: &str) -> Option<&Value> {
        self.context.get(ERRORS_KEY)?.get(node_id)
    }

    /// Forget a node's outcome so it can run again in the next loop iteration
    ///
    /// The step sets describe the current iteration only. Earlier failures stay
    /// in `messages` and in the context `errors` record.
    pub fn reset_step(&mut self, node_id: &str) {
        self.completed_steps.remove(node_id);
        self.failed_steps.remove(node_id);
        self.skipped_steps.remove(node_id);
    }

    /// Convert state to JSON object
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
