// SPDX-License-Identifier: MIT

//! State-machine executor
//!
//! Runs a `CompiledGraph` in rounds. Each round dispatches every ready node
//! concurrently against a shared borrow of the run state, joins, then merges
//! the outcomes in completion order. Merging is the only place the state is
//! written.
//!
//! Nodes move `Pending -> Running -> Completed | Failed | Skipped`; edges move
//! `Pending -> Activated | Dead`. A node is ready once all of its forward
//! incoming edges are resolved and at least one was activated, and skipped
//! when all are resolved and none was.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::looping::{self, ExitReason, LoopDecision};
use super::router::{self, BranchDecision};
use super::types::{CompiledGraph, CompiledNode, EdgeKind, NodeKind};
use crate::adk::agent::{AgentExecutor, AgentStep};
use crate::adk::error::{
    CancelledError, DelegateError, ErrorCategory, EvaluationError, NodeExecutionError,
};
use crate::adk::persistence::Persistence;
use crate::stepflow::workflow::expression::{interpolate, Scope};
use crate::stepflow::workflow::registry::ActionRegistry;
use crate::stepflow::workflow::state::{
    ExecutionError, ExecutionErrorKind, ExecutionState, IterationRecord, MetadataNote,
    StepMessage, StepStatus,
};

/// Lifecycle of a node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeStatus {
    Pending,
    Activated,
    Dead,
}

/// Progress notifications emitted while a run executes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, workflow: String },
    #[serde(rename_all = "camelCase")]
    NodeStarted { node_id: String, node_type: String },
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node_id: String,
        output: Value,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        node_id: String,
        category: ErrorCategory,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeSkipped { node_id: String },
    #[serde(rename_all = "camelCase")]
    BranchTaken { node_id: String, branch: String },
    #[serde(rename_all = "camelCase")]
    LoopDecision {
        node_id: String,
        branch: String,
        iteration: u64,
        limit_reached: bool,
    },
    #[serde(rename_all = "camelCase")]
    RunFinished { success: bool, cancelled: bool },
}

/// Per-run knobs
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Upper bound on nodes dispatched in one round
    pub max_parallelism: Option<usize>,
    /// Store a snapshot of the state after every round
    pub checkpoints: Option<Arc<dyn Persistence>>,
    pub events: Option<mpsc::Sender<ExecutionEvent>>,
    pub cancel: CancellationToken,
}

/// Final state of a run plus the rendered output of the first end node
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: ExecutionState,
    pub output: Option<Value>,
}

/// Executes compiled graphs against the configured collaborators
#[derive(Clone)]
pub struct GraphExecutor {
    graph: Arc<CompiledGraph>,
    agents: Arc<dyn AgentExecutor>,
    actions: ActionRegistry,
}

enum Completion {
    Output(Value),
    Branch(BranchDecision),
    Loop(LoopDecision),
    End(Option<Value>),
}

impl Completion {
    fn result(&self) -> Value {
        match self {
            Completion::Output(value) => value.clone(),
            Completion::Branch(decision) => json!(decision.branch),
            Completion::Loop(decision) => decision.to_result(),
            Completion::End(output) => output.clone().unwrap_or(Value::Null),
        }
    }
}

struct Failure {
    kind: ExecutionErrorKind,
    category: ErrorCategory,
    message: String,
}

impl Failure {
    fn evaluation(node_id: &str, err: EvaluationError) -> Self {
        Self {
            kind: ExecutionErrorKind::Evaluation,
            category: ErrorCategory::Validation,
            message: format!("node '{}': {}", node_id, err),
        }
    }

    fn delegate(node_id: &str, err: DelegateError) -> Self {
        let err = NodeExecutionError::new(node_id, err);
        Self {
            kind: ExecutionErrorKind::NodeExecution,
            category: err.category,
            message: err.to_string(),
        }
    }
}

struct NodeOutcome {
    node: usize,
    input: Value,
    iteration: Option<u64>,
    result: Result<Completion, Failure>,
    timestamp: DateTime<Utc>,
    duration_ms: u64,
}

/// Mutable bookkeeping of one run
struct Run<'g> {
    graph: &'g CompiledGraph,
    nodes: Vec<NodeStatus>,
    edges: Vec<EdgeStatus>,
    /// Loops whose body is in flight, waiting on their back-edges
    awaiting: BTreeSet<usize>,
    queue: VecDeque<usize>,
    events: Vec<ExecutionEvent>,
    halted: bool,
    end_reached: bool,
    output: Option<Value>,
}

impl GraphExecutor {
    pub fn new(
        graph: Arc<CompiledGraph>,
        agents: Arc<dyn AgentExecutor>,
        actions: ActionRegistry,
    ) -> Self {
        Self {
            graph,
            agents,
            actions,
        }
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Drive the graph from its start node until nothing is left to run
    pub async fn run(&self, mut state: ExecutionState, options: &RunOptions) -> RunOutcome {
        let graph = self.graph.as_ref();
        let mut run = Run::new(graph);

        state.metadata.warnings = graph.warning_messages();
        state.seed_defaults(&graph.schema);
        run.events.push(ExecutionEvent::RunStarted {
            run_id: state.metadata.run_id.clone(),
            workflow: graph.name.clone(),
        });
        log::info!(
            "Starting run {} of workflow '{}'",
            state.metadata.run_id,
            graph.name
        );

        if let Some(start) = graph.index.get(&graph.start).copied() {
            run.nodes[start] = NodeStatus::Running;
            run.queue.push_back(start);
        }

        let mut round = 0;
        let mut cancelled = false;
        loop {
            emit(&mut run.events, options).await;
            if options.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if run.queue.is_empty() {
                break;
            }

            round += 1;
            let width = options
                .max_parallelism
                .unwrap_or(usize::MAX)
                .clamp(1, run.queue.len());
            let batch: Vec<usize> = run.queue.drain(..width).collect();
            log::debug!(
                "Round {}: dispatching {:?}",
                round,
                batch
                    .iter()
                    .map(|&i| graph.nodes[i].id.as_str())
                    .collect::<Vec<_>>()
            );
            for &i in &batch {
                run.events.push(ExecutionEvent::NodeStarted {
                    node_id: graph.nodes[i].id.clone(),
                    node_type: graph.nodes[i].node_type().to_string(),
                });
            }
            emit(&mut run.events, options).await;

            let outcomes = {
                let mut in_flight: FuturesUnordered<_> = batch
                    .iter()
                    .map(|&i| self.execute_node(i, &state))
                    .collect();
                let mut outcomes = Vec::with_capacity(batch.len());
                while let Some(outcome) = in_flight.next().await {
                    outcomes.push(outcome);
                }
                outcomes
            };

            if options.cancel.is_cancelled() {
                log::warn!(
                    "Run {} cancelled; discarding {} in-flight result(s)",
                    state.metadata.run_id,
                    outcomes.len()
                );
                cancelled = true;
                break;
            }

            for outcome in outcomes {
                run.apply(outcome, &mut state);
            }

            if run.halted {
                run.skip_unfinished(&mut state);
            } else {
                run.settle(&mut state);
            }
            checkpoint(&state, options).await;
            if run.halted {
                break;
            }
        }

        run.finish(&mut state, cancelled);
        emit(&mut run.events, options).await;
        checkpoint(&state, options).await;

        log::info!(
            "Run {} finished: success={} completed={} failed={} skipped={}",
            state.metadata.run_id,
            state.metadata.success,
            state.completed_steps.len(),
            state.failed_steps.len(),
            state.skipped_steps.len()
        );
        RunOutcome {
            output: run.output,
            state,
        }
    }

    /// Run one node against the current state without touching it
    async fn execute_node(&self, index: usize, state: &ExecutionState) -> NodeOutcome {
        let node = &self.graph.nodes[index];
        let timestamp = Utc::now();
        let started = Instant::now();
        let iteration = self
            .graph
            .enclosing_loop(&node.id)
            .and_then(|loop_id| state.iteration_record(loop_id))
            .map(|r| r.iteration);

        let (input, result) = self.dispatch(node, state).await;

        NodeOutcome {
            node: index,
            input,
            iteration,
            result,
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn dispatch(
        &self,
        node: &CompiledNode,
        state: &ExecutionState,
    ) -> (Value, Result<Completion, Failure>) {
        let id = node.id.as_str();
        match &node.kind {
            NodeKind::Start => (Value::Null, Ok(Completion::Output(state.input_data.clone()))),

            NodeKind::Agent { config, retry } => {
                let resolved = match interpolate(config, &Scope::from_state(state)) {
                    Ok(resolved) => resolved,
                    Err(e) => return (config.clone(), Err(Failure::evaluation(id, e))),
                };
                let step = AgentStep {
                    node_id: node.id.clone(),
                    label: node.label.clone(),
                    config: resolved,
                };
                let agents = &self.agents;
                let step_ref = &step;
                let (result, attempts) = retry
                    .clone()
                    .unwrap_or_default()
                    .run(id, move |_| async move {
                        agents
                            .execute(step_ref, state)
                            .await
                            .map_err(DelegateError::from)
                    })
                    .await;
                if attempts > 1 {
                    log::info!("Agent node {} finished after {} attempts", id, attempts);
                }
                (
                    step.config.clone(),
                    result
                        .map(Completion::Output)
                        .map_err(|e| Failure::delegate(id, e)),
                )
            }

            NodeKind::Action {
                action_type,
                params,
                retry,
            } => {
                let resolved = match interpolate(params, &Scope::from_state(state)) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        let input = json!({ "actionType": action_type, "params": params });
                        return (input, Err(Failure::evaluation(id, e)));
                    }
                };
                let actions = &self.actions;
                let params_ref = &resolved;
                let (result, attempts) = retry
                    .clone()
                    .unwrap_or_default()
                    .run(id, move |_| async move {
                        actions
                            .perform(action_type, params_ref, state)
                            .await
                            .map_err(DelegateError::from)
                    })
                    .await;
                if attempts > 1 {
                    log::info!("Action node {} finished after {} attempts", id, attempts);
                }
                (
                    json!({ "actionType": action_type, "params": resolved }),
                    result
                        .map(Completion::Output)
                        .map_err(|e| Failure::delegate(id, e)),
                )
            }

            NodeKind::Condition { expression, .. } => {
                let input = json!({ "expression": expression.source() });
                match router::route(expression, state) {
                    Ok(decision) => (input, Ok(Completion::Branch(decision))),
                    Err(e) => (input, Err(Failure::evaluation(id, e))),
                }
            }

            NodeKind::Loop {
                max_iterations,
                condition,
            } => {
                let input = json!({
                    "iteration": state.iteration_record(id).map_or(0, |r| r.iteration),
                    "maxIterations": max_iterations,
                });
                match looping::decide(id, *max_iterations, condition.as_ref(), state) {
                    Ok(decision) => (input, Ok(Completion::Loop(decision))),
                    Err(e) => (input, Err(Failure::evaluation(id, e))),
                }
            }

            NodeKind::ErrorHandler { recover } => {
                let failed = self
                    .graph
                    .incoming(id)
                    .first()
                    .map(|&e| self.graph.edges[e].source.as_str());
                let failure = failed
                    .and_then(|source| state.failure_of(source))
                    .cloned()
                    .unwrap_or(Value::Null);
                let result = match recover {
                    Some(template) => interpolate(template, &Scope::from_state(state))
                        .map(Completion::Output)
                        .map_err(|e| Failure::evaluation(id, e)),
                    None => Ok(Completion::Output(
                        json!({ "recovered": true, "error": failure.clone() }),
                    )),
                };
                (failure, result)
            }

            NodeKind::End { output } => {
                let result = match output {
                    Some(template) => interpolate(template, &Scope::from_state(state))
                        .map(|v| Completion::End(Some(v)))
                        .map_err(|e| Failure::evaluation(id, e)),
                    None => Ok(Completion::End(None)),
                };
                (Value::Null, result)
            }
        }
    }
}

impl<'g> Run<'g> {
    fn new(graph: &'g CompiledGraph) -> Self {
        Self {
            graph,
            nodes: vec![NodeStatus::Pending; graph.nodes.len()],
            edges: vec![EdgeStatus::Pending; graph.edges.len()],
            awaiting: BTreeSet::new(),
            queue: VecDeque::new(),
            events: Vec::new(),
            halted: false,
            end_reached: false,
            output: None,
        }
    }

    /// Merge one node's outcome into the state
    fn apply(&mut self, outcome: NodeOutcome, state: &mut ExecutionState) {
        let graph = self.graph;
        let node = &graph.nodes[outcome.node];
        let id = node.id.as_str();

        match outcome.result {
            Ok(completion) => {
                let result = completion.result();
                self.nodes[outcome.node] = NodeStatus::Completed;
                state.completed_steps.insert(node.id.clone());
                state.step_results.insert(node.id.clone(), result.clone());
                state.messages.push(StepMessage {
                    id: node.id.clone(),
                    node_type: node.node_type().to_string(),
                    status: StepStatus::Completed,
                    input: outcome.input,
                    output: result.clone(),
                    error: None,
                    iteration: match &completion {
                        Completion::Loop(decision) => Some(decision.iteration()),
                        _ => outcome.iteration,
                    },
                    timestamp: outcome.timestamp,
                    duration_ms: outcome.duration_ms,
                });

                for (key, path) in &node.outputs {
                    match extract_json_path(&result, path) {
                        Some(value) => {
                            state.update_context(key, value, graph.schema.reducer_for(key))
                        }
                        None => log::warn!(
                            "Node {} output has no value at '{}' for context key '{}'",
                            id,
                            path,
                            key
                        ),
                    }
                }

                match completion {
                    Completion::Output(_) if matches!(node.kind, NodeKind::Start) => {
                        state.context.insert("input".to_string(), state.input_data.clone());
                        self.activate_normal(outcome.node);
                    }
                    Completion::Output(_) => self.activate_normal(outcome.node),
                    Completion::Branch(decision) => {
                        log::info!("Condition {} took branch '{}'", id, decision.branch);
                        self.activate_branch(outcome.node, decision.branch);
                        self.events.push(ExecutionEvent::BranchTaken {
                            node_id: node.id.clone(),
                            branch: decision.branch.to_string(),
                        });
                    }
                    Completion::Loop(decision) => self.apply_loop(outcome.node, decision, state),
                    Completion::End(output) => {
                        self.end_reached = true;
                        if state.metadata.completed_at.is_none() {
                            state.metadata.completed_at = Some(Utc::now());
                            self.output = output;
                        }
                    }
                }

                self.events.push(ExecutionEvent::NodeCompleted {
                    node_id: node.id.clone(),
                    output: result,
                    duration_ms: outcome.duration_ms,
                });
            }
            Err(failure) => {
                log::error!("Node {} failed: {}", id, failure.message);
                self.nodes[outcome.node] = NodeStatus::Failed;
                state.failed_steps.insert(node.id.clone());
                state.record_failure(id, failure.category, &failure.message);
                state.messages.push(StepMessage {
                    id: node.id.clone(),
                    node_type: node.node_type().to_string(),
                    status: StepStatus::Failed,
                    input: outcome.input,
                    output: Value::Null,
                    error: Some(failure.message.clone()),
                    iteration: outcome.iteration,
                    timestamp: outcome.timestamp,
                    duration_ms: outcome.duration_ms,
                });
                self.events.push(ExecutionEvent::NodeFailed {
                    node_id: node.id.clone(),
                    category: failure.category,
                    error: failure.message.clone(),
                });

                let handled = graph.error_handler_for(id).is_some();
                for &e in graph.outgoing(id) {
                    self.edges[e] = if handled && graph.edges[e].kind == EdgeKind::Failure {
                        EdgeStatus::Activated
                    } else {
                        EdgeStatus::Dead
                    };
                }
                if handled {
                    log::info!("Routing failure of {} to its error handler", id);
                } else {
                    self.halted = true;
                    if state.error.is_none() {
                        state.error = Some(ExecutionError {
                            node_id: Some(node.id.clone()),
                            kind: failure.kind,
                            category: failure.category,
                            message: failure.message,
                        });
                    }
                }
            }
        }
    }

    fn apply_loop(&mut self, index: usize, decision: LoopDecision, state: &mut ExecutionState) {
        let graph = self.graph;
        let node = &graph.nodes[index];
        let NodeKind::Loop { max_iterations, .. } = node.kind else {
            return;
        };
        state.set_iteration_record(&node.id, decision.record(max_iterations));

        let limit_reached = matches!(
            decision,
            LoopDecision::Exit {
                reason: ExitReason::LimitReached,
                ..
            }
        );
        if limit_reached {
            state.metadata.notes.push(MetadataNote::LoopLimitReached {
                node_id: node.id.clone(),
                iteration: decision.iteration(),
                max_iterations,
                timestamp: Utc::now(),
            });
        }
        self.events.push(ExecutionEvent::LoopDecision {
            node_id: node.id.clone(),
            branch: decision.branch().to_string(),
            iteration: decision.iteration(),
            limit_reached,
        });

        if let LoopDecision::Continue { .. } = decision {
            self.reset_body(&node.id, state);
            self.awaiting.insert(index);
            for &e in graph.outgoing(&node.id) {
                match &graph.edges[e].kind {
                    EdgeKind::Branch(b) if b == decision.branch() => {
                        self.edges[e] = EdgeStatus::Activated
                    }
                    // exit stays pending until the loop is left
                    EdgeKind::Branch(_) => self.edges[e] = EdgeStatus::Pending,
                    _ => self.edges[e] = EdgeStatus::Dead,
                }
            }
        } else {
            self.activate_branch(index, decision.branch());
        }
    }

    /// Put a loop body back to `Pending` for the next iteration
    fn reset_body(&mut self, loop_id: &str, state: &mut ExecutionState) {
        let graph = self.graph;
        let Some(body) = graph.loop_body(loop_id) else {
            return;
        };
        for id in body {
            let Some(&index) = graph.index.get(id) else {
                continue;
            };
            self.nodes[index] = NodeStatus::Pending;
            self.awaiting.remove(&index);
            state.reset_step(id);
            for &e in graph.outgoing(id) {
                self.edges[e] = EdgeStatus::Pending;
            }
        }
    }

    /// Source completed normally: every non-failure edge fires
    fn activate_normal(&mut self, index: usize) {
        for &e in self.graph.outgoing(&self.graph.nodes[index].id) {
            self.edges[e] = match self.graph.edges[e].kind {
                EdgeKind::Failure => EdgeStatus::Dead,
                _ => EdgeStatus::Activated,
            };
        }
    }

    /// Only the chosen branch fires
    fn activate_branch(&mut self, index: usize, branch: &str) {
        for &e in self.graph.outgoing(&self.graph.nodes[index].id) {
            self.edges[e] = match &self.graph.edges[e].kind {
                EdgeKind::Branch(b) if b == branch => EdgeStatus::Activated,
                _ => EdgeStatus::Dead,
            };
        }
    }

    fn skip(&mut self, index: usize, state: &mut ExecutionState) {
        let node = &self.graph.nodes[index];
        log::debug!("Skipping node {}", node.id);
        self.nodes[index] = NodeStatus::Skipped;
        state.skipped_steps.insert(node.id.clone());
        for &e in self.graph.outgoing(&node.id) {
            self.edges[e] = EdgeStatus::Dead;
        }
        self.events.push(ExecutionEvent::NodeSkipped {
            node_id: node.id.clone(),
        });
    }

    /// Resolve readiness until nothing changes: queue ready nodes, cascade
    /// skips, and re-arrive at loops whose back-edges have all resolved
    fn settle(&mut self, state: &mut ExecutionState) {
        let graph = self.graph;
        loop {
            let mut changed = false;

            for index in 0..graph.nodes.len() {
                if self.nodes[index] != NodeStatus::Pending {
                    continue;
                }
                let node = &graph.nodes[index];
                let incoming = graph.incoming(&node.id);
                if incoming.iter().any(|&e| self.edges[e] == EdgeStatus::Pending) {
                    continue;
                }
                changed = true;
                if incoming.iter().any(|&e| self.edges[e] == EdgeStatus::Activated) {
                    if let NodeKind::Loop { max_iterations, .. } = node.kind {
                        // entering a loop starts a fresh count
                        state.set_iteration_record(
                            &node.id,
                            IterationRecord {
                                iteration: 0,
                                max_iterations,
                            },
                        );
                    }
                    self.nodes[index] = NodeStatus::Running;
                    self.queue.push_back(index);
                } else {
                    self.skip(index, state);
                }
            }

            let arrived: Vec<usize> = self
                .awaiting
                .iter()
                .copied()
                .filter(|&index| {
                    graph
                        .back_edges(&graph.nodes[index].id)
                        .iter()
                        .all(|&e| self.edges[e] != EdgeStatus::Pending)
                })
                .collect();
            for index in arrived {
                changed = true;
                self.awaiting.remove(&index);
                self.nodes[index] = NodeStatus::Running;
                self.queue.push_back(index);
            }

            if !changed {
                break;
            }
        }
    }

    /// After an unhandled failure nothing else runs
    fn skip_unfinished(&mut self, state: &mut ExecutionState) {
        self.queue.clear();
        self.awaiting.clear();
        for index in 0..self.nodes.len() {
            if matches!(self.nodes[index], NodeStatus::Pending | NodeStatus::Running) {
                self.skip(index, state);
            }
        }
    }

    fn finish(&mut self, state: &mut ExecutionState, cancelled: bool) {
        let metadata = &mut state.metadata;
        if cancelled {
            metadata.cancelled = true;
            metadata.success = false;
            state.error = Some(ExecutionError {
                node_id: None,
                kind: ExecutionErrorKind::Cancelled,
                category: ErrorCategory::Unknown,
                message: CancelledError {
                    run_id: metadata.run_id.clone(),
                }
                .to_string(),
            });
        } else if state.error.is_some() {
            metadata.success = false;
        } else if self.end_reached {
            metadata.success = true;
        } else {
            metadata.success = false;
            state.error = Some(ExecutionError {
                node_id: None,
                kind: ExecutionErrorKind::Incomplete,
                category: ErrorCategory::BusinessLogic,
                message: "run finished without reaching an end node".to_string(),
            });
        }
        if state.metadata.completed_at.is_none() {
            state.metadata.completed_at = Some(Utc::now());
        }
        self.events.push(ExecutionEvent::RunFinished {
            success: state.metadata.success,
            cancelled,
        });
    }
}

async fn emit(events: &mut Vec<ExecutionEvent>, options: &RunOptions) {
    let drained = std::mem::take(events);
    let Some(sender) = &options.events else {
        return;
    };
    for event in drained {
        // a dropped receiver only means nobody is listening any more
        if sender.send(event).await.is_err() {
            break;
        }
    }
}

async fn checkpoint(state: &ExecutionState, options: &RunOptions) {
    if let Some(store) = &options.checkpoints {
        if let Err(e) = store.save_checkpoint(&state.metadata.run_id, state).await {
            log::warn!(
                "Failed to checkpoint run {}: {}",
                state.metadata.run_id,
                e
            );
        }
    }
}

/// Extract a value from JSON using dot notation; an empty path is the value itself
fn extract_json_path(json: &Value, path: &str) -> Option<Value> {
    if path.is_empty() || path == "." {
        return Some(json.clone());
    }
    let mut current = json;
    for part in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::AgentExecutionError;
    use crate::stepflow::workflow::graph::compile;
    use crate::stepflow::workflow::types::{
        EdgeDefinition, NodeDefinition, NodeType, WorkflowDefinition,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns `{"node": <id>}`, or fails for ids listed in `failing`
    struct ScriptedAgent {
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedAgent {
        async fn execute(
            &self,
            step: &AgentStep,
            _state: &ExecutionState,
        ) -> Result<Value, AgentExecutionError> {
            self.calls.lock().unwrap().push(step.node_id.clone());
            if self.failing.contains(&step.node_id) {
                return Err(AgentExecutionError::new("model refused the request"));
            }
            Ok(json!({ "node": step.node_id, "config": step.config }))
        }
    }

    fn node(id: &str, node_type: NodeType, config: Value) -> NodeDefinition {
        NodeDefinition::new(id, node_type, config)
    }

    fn executor(def: WorkflowDefinition, agent: Arc<ScriptedAgent>) -> GraphExecutor {
        GraphExecutor::new(
            Arc::new(compile(&def).unwrap()),
            agent,
            ActionRegistry::new(),
        )
    }

    async fn run(exec: &GraphExecutor, input: Value) -> RunOutcome {
        let state = ExecutionState::new("run-1", &exec.graph().name, input);
        exec.run(state, &RunOptions::default()).await
    }

    fn chain(ids: &[&str]) -> Vec<EdgeDefinition> {
        ids.windows(2)
            .map(|w| EdgeDefinition::new(w[0], w[1]))
            .collect()
    }

    #[tokio::test]
    async fn test_linear_run_interpolates_agent_config() {
        let def = WorkflowDefinition {
            name: "linear".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("a", NodeType::Agent, json!({"prompt": "Tell me about {{ $input.topic }}"})),
                node("end", NodeType::End, json!({"output": "{{ $node.a.node }}"})),
            ],
            edges: chain(&["start", "a", "end"]),
            state: None,
        };
        let agent = ScriptedAgent::new(&[]);
        let outcome = run(&executor(def, agent.clone()), json!({"topic": "rust"})).await;

        let state = &outcome.state;
        assert!(state.metadata.success);
        assert!(state.metadata.completed_at.is_some());
        assert_eq!(state.step_results["a"]["config"]["prompt"], "Tell me about rust");
        assert_eq!(state.context["input"], json!({"topic": "rust"}));
        assert_eq!(outcome.output, Some(json!("a")));
        let order: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["start", "a", "end"]);
    }

    #[tokio::test]
    async fn test_fan_out_joins_before_successor() {
        let def = WorkflowDefinition {
            name: "fan".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("left", NodeType::Agent, json!({"outputs": {"findings": "node"}})),
                node("right", NodeType::Agent, json!({"outputs": {"findings": "node"}})),
                node("join", NodeType::Agent, json!({})),
                node("end", NodeType::End, json!({})),
            ],
            edges: vec![
                EdgeDefinition::new("start", "left"),
                EdgeDefinition::new("start", "right"),
                EdgeDefinition::new("left", "join"),
                EdgeDefinition::new("right", "join"),
                EdgeDefinition::new("join", "end"),
            ],
            state: Some(
                serde_yaml::from_str("findings: { type: array, reducer: append }").unwrap(),
            ),
        };
        let agent = ScriptedAgent::new(&[]);
        let outcome = run(&executor(def, agent.clone()), json!({})).await;

        let state = &outcome.state;
        assert!(state.metadata.success);
        let position = |id: &str| state.messages.iter().position(|m| m.id == id).unwrap();
        assert!(position("left") < position("join"));
        assert!(position("right") < position("join"));
        let mut findings: Vec<String> = state.context["findings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        findings.sort();
        assert_eq!(findings, vec!["left", "right"]);
        assert_eq!(agent.calls().iter().filter(|c| *c == "join").count(), 1);
    }

    #[tokio::test]
    async fn test_untaken_branch_is_skipped() {
        let def = WorkflowDefinition {
            name: "router".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("check", NodeType::Condition, json!({"expression": "$input.ok"})),
                node("yes", NodeType::Agent, json!({})),
                node("no", NodeType::Agent, json!({})),
                node("no_followup", NodeType::Agent, json!({})),
                node("end", NodeType::End, json!({})),
            ],
            edges: vec![
                EdgeDefinition::new("start", "check"),
                EdgeDefinition::labeled("check", "yes", "true"),
                EdgeDefinition::labeled("check", "no", "false"),
                EdgeDefinition::new("no", "no_followup"),
                EdgeDefinition::new("yes", "end"),
                EdgeDefinition::new("no_followup", "end"),
            ],
            state: None,
        };
        let agent = ScriptedAgent::new(&[]);
        let outcome = run(&executor(def, agent.clone()), json!({"ok": true})).await;

        let state = &outcome.state;
        assert!(state.metadata.success);
        assert_eq!(state.step_results["check"], json!("true"));
        assert_eq!(agent.calls(), vec!["yes"]);
        assert!(state.skipped_steps.contains("no"));
        assert!(state.skipped_steps.contains("no_followup"));
        assert!(state.completed_steps.contains("end"));
    }

    #[tokio::test]
    async fn test_loop_body_runs_max_iterations_times() {
        let def = WorkflowDefinition {
            name: "loop".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("loop1", NodeType::Loop, json!({"maxIterations": 3})),
                node("body", NodeType::Agent, json!({})),
                node("end", NodeType::End, json!({})),
            ],
            edges: vec![
                EdgeDefinition::new("start", "loop1"),
                EdgeDefinition::labeled("loop1", "body", "continue"),
                EdgeDefinition::labeled("loop1", "end", "exit"),
                EdgeDefinition::new("body", "loop1"),
            ],
            state: None,
        };
        let agent = ScriptedAgent::new(&[]);
        let outcome = run(&executor(def, agent.clone()), json!({})).await;

        let state = &outcome.state;
        assert!(state.metadata.success);
        assert_eq!(agent.calls().len(), 3);
        assert_eq!(state.iteration_record("loop1").unwrap().iteration, 3);
        assert_eq!(state.metadata.notes.len(), 1);
        let body_iterations: Vec<Option<u64>> = state
            .messages
            .iter()
            .filter(|m| m.id == "body")
            .map(|m| m.iteration)
            .collect();
        assert_eq!(body_iterations, vec![Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_failure_with_handler_recovers() {
        let def = WorkflowDefinition {
            name: "recover".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("flaky", NodeType::Agent, json!({})),
                node("handler", NodeType::ErrorHandler, json!({})),
                node("end", NodeType::End, json!({})),
            ],
            edges: vec![
                EdgeDefinition::new("start", "flaky"),
                EdgeDefinition::new("flaky", "end"),
                EdgeDefinition::new("flaky", "handler"),
                EdgeDefinition::new("handler", "end"),
            ],
            state: None,
        };
        let outcome = run(&executor(def, ScriptedAgent::new(&["flaky"])), json!({})).await;

        let state = &outcome.state;
        assert!(state.metadata.success);
        assert!(state.failed_steps.contains("flaky"));
        assert_eq!(state.step_results["handler"]["recovered"], json!(true));
        assert_eq!(state.step_results["handler"]["error"]["nodeId"], json!("flaky"));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_unhandled_failure_halts() {
        let def = WorkflowDefinition {
            name: "halt".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("a", NodeType::Agent, json!({})),
                node("b", NodeType::Agent, json!({})),
                node("end", NodeType::End, json!({})),
            ],
            edges: chain(&["start", "a", "b", "end"]),
            state: None,
        };
        let agent = ScriptedAgent::new(&["a"]);
        let outcome = run(&executor(def, agent.clone()), json!({})).await;

        let state = &outcome.state;
        assert!(!state.metadata.success);
        let error = state.error.as_ref().unwrap();
        assert_eq!(error.node_id.as_deref(), Some("a"));
        assert_eq!(error.kind, ExecutionErrorKind::NodeExecution);
        assert!(state.skipped_steps.contains("b"));
        assert!(state.skipped_steps.contains("end"));
        assert_eq!(agent.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_condition_evaluation_failure_is_node_failure() {
        let def = WorkflowDefinition {
            name: "bad-condition".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("check", NodeType::Condition, json!({"expression": "$input.n / 0"})),
                node("end", NodeType::End, json!({})),
            ],
            edges: vec![
                EdgeDefinition::new("start", "check"),
                EdgeDefinition::labeled("check", "end", "true"),
                EdgeDefinition::labeled("check", "end", "false"),
            ],
            state: None,
        };
        let outcome = run(&executor(def, ScriptedAgent::new(&[])), json!({"n": 1})).await;
        let error = outcome.state.error.unwrap();
        assert_eq!(error.kind, ExecutionErrorKind::Evaluation);
        assert!(outcome.state.failed_steps.contains("check"));
    }

    #[tokio::test]
    async fn test_events_and_cancellation() {
        let def = WorkflowDefinition {
            name: "events".to_string(),
            description: String::new(),
            nodes: vec![
                node("start", NodeType::Start, json!({})),
                node("a", NodeType::Agent, json!({})),
                node("end", NodeType::End, json!({})),
            ],
            edges: chain(&["start", "a", "end"]),
            state: None,
        };
        let exec = executor(def, ScriptedAgent::new(&[]));

        let (tx, mut rx) = mpsc::channel(64);
        let options = RunOptions {
            events: Some(tx),
            ..RunOptions::default()
        };
        let state = ExecutionState::new("run-ev", "events", json!({}));
        exec.run(state, &options).await;
        drop(options);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
        assert_eq!(
            events.last(),
            Some(&ExecutionEvent::RunFinished {
                success: true,
                cancelled: false
            })
        );

        let options = RunOptions::default();
        options.cancel.cancel();
        let state = ExecutionState::new("run-cancel", "events", json!({}));
        let outcome = exec.run(state, &options).await;
        assert!(outcome.state.metadata.cancelled);
        assert!(!outcome.state.metadata.success);
        assert_eq!(
            outcome.state.error.unwrap().kind,
            ExecutionErrorKind::Cancelled
        );
        assert!(outcome.state.messages.is_empty());
    }

    #[test]
    fn test_extract_json_path() {
        let value = json!({"result": {"items": [{"v": 1}, {"v": 2}]}});
        assert_eq!(extract_json_path(&value, "result.items.1.v"), Some(json!(2)));
        assert_eq!(extract_json_path(&value, ""), Some(value.clone()));
        assert_eq!(extract_json_path(&value, "result.missing"), None);
    }
}
