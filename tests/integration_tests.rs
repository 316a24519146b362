//! Integration tests for workflow loading and execution
//!
//! These tests verify end-to-end workflow functionality using mock components.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use stepflow_rs::adk::agent::{AgentExecutor, AgentStep};
use stepflow_rs::adk::error::{AgentExecutionError, EvaluationError, StepflowError};
use stepflow_rs::adk::persistence::Persistence;
use stepflow_rs::stepflow::actions;
use stepflow_rs::stepflow::config::EngineConfig;
use stepflow_rs::stepflow::workflow::builder::{Engine, RunControl};
use stepflow_rs::stepflow::workflow::expression::Expression;
use stepflow_rs::stepflow::workflow::graph::ExecutionEvent;
use stepflow_rs::stepflow::workflow::loader::WorkflowLoader;
use stepflow_rs::stepflow::workflow::persistence::FilePersistence;
use stepflow_rs::stepflow::workflow::registry::ActionRegistry;
use stepflow_rs::stepflow::workflow::state::{ExecutionErrorKind, ExecutionState, MetadataNote};
use stepflow_rs::stepflow::workflow::types::WorkflowDefinition;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Components
// ============================================================================

/// Mock agent executor that replays scripted outcomes per node
///
/// Nodes without a script answer `{ "node": <id>, "config": <resolved config> }`.
#[derive(Default)]
struct MockAgent {
    scripts: Mutex<HashMap<String, Vec<Result<Value, String>>>>,
    calls: Mutex<Vec<String>>,
    /// Cancelled by the first call to this node id
    cancel_on: Option<(String, CancellationToken)>,
}

impl MockAgent {
    fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for a node; the last one repeats once the queue runs dry
    fn script(self, node_id: &str, outcomes: Vec<Result<Value, &str>>) -> Self {
        let outcomes = outcomes
            .into_iter()
            .map(|r| r.map_err(|e| e.to_string()))
            .collect();
        self.scripts
            .lock()
            .unwrap()
            .insert(node_id.to_string(), outcomes);
        self
    }

    fn cancel_on(mut self, node_id: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((node_id.to_string(), token));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self, node_id: &str) -> usize {
        self.calls().iter().filter(|c| *c == node_id).count()
    }
}

#[async_trait]
impl AgentExecutor for MockAgent {
    async fn execute(
        &self,
        step: &AgentStep,
        _state: &ExecutionState,
    ) -> Result<Value, AgentExecutionError> {
        self.calls.lock().unwrap().push(step.node_id.clone());
        if let Some((id, token)) = &self.cancel_on {
            if *id == step.node_id {
                token.cancel();
            }
        }

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(&step.node_id).and_then(|queue| {
                if queue.len() > 1 {
                    Some(queue.remove(0))
                } else {
                    queue.first().cloned()
                }
            })
        };
        match scripted {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(AgentExecutionError::new(message)),
            None => Ok(json!({ "node": step.node_id, "config": step.config })),
        }
    }
}

async fn engine_with(agent: Arc<MockAgent>, config: EngineConfig) -> Engine {
    let registry = ActionRegistry::new();
    actions::register_builtin(&registry, &config).await;
    Engine::new(config, agent, registry)
}

async fn engine(agent: Arc<MockAgent>) -> Engine {
    engine_with(agent, EngineConfig::default()).await
}

fn yaml(doc: &str) -> WorkflowDefinition {
    WorkflowLoader::parse_yaml(doc).expect("fixture should parse")
}

// ============================================================================
// Fixtures
// ============================================================================

const ROUTER_WORKFLOW: &str = r#"
name: Value Router
description: Routes high and low values to different agents
nodes:
  - id: start
    type: start
  - id: check
    type: condition
    config:
      expression: "{{ $input.value > 50 }}"
  - id: agentA
    type: agent
    config:
      prompt: "High value {{ $input.value }}"
  - id: agentB
    type: agent
    config:
      prompt: "Low value {{ $input.value }}"
  - id: end
    type: end
    config:
      output: "{{ $node.agentA.config.prompt }}"
edges:
  - { source: start, target: check }
  - { source: check, target: agentA, label: "true" }
  - { source: check, target: agentB, label: "false" }
  - { source: agentA, target: end }
  - { source: agentB, target: end }
"#;

const COUNTING_LOOP: &str = r#"
name: Counting Loop
nodes:
  - id: start
    type: start
  - id: loop1
    type: loop
    config:
      maxIterations: 3
  - id: count
    type: action
    config:
      actionType: transform
      params:
        value: "{{ $context.iterationRecord.loop1.iteration }}"
  - id: end
    type: end
edges:
  - { source: start, target: loop1 }
  - { source: loop1, target: count, label: continue }
  - { source: loop1, target: end, label: exit }
  - { source: count, target: loop1 }
"#;

const GUARDED_AGENT: &str = r#"
name: Guarded Agent
nodes:
  - id: start
    type: start
  - id: flaky
    type: agent
    config:
      prompt: "do the thing"
  - id: handler
    type: error_handler
    config:
      recover:
        fallback: true
        reason: "{{ $context.errors.flaky.category }}"
  - id: end
    type: end
    config:
      output: "{{ $node.handler }}"
edges:
  - { source: start, target: flaky }
  - { source: flaky, target: end }
  - { source: flaky, target: handler }
  - { source: handler, target: end }
"#;

const CHAIN: &str = r#"
name: Chain
nodes:
  - { id: start, type: start }
  - { id: first, type: agent, config: { prompt: "one" } }
  - { id: second, type: agent, config: { prompt: "two" } }
  - { id: end, type: end }
edges:
  - { source: start, target: first }
  - { source: first, target: second }
  - { source: second, target: end }
"#;

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_condition_routes_to_exactly_one_branch() {
    let agent = Arc::new(MockAgent::new());
    let engine = engine(agent.clone()).await;

    let result = engine
        .execute(&yaml(ROUTER_WORKFLOW), json!({"value": 75}))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(agent.calls(), vec!["agentA"]);
    let state = &result.execution_state;
    assert_eq!(state.step_results["check"], json!("true"));
    assert!(state.completed_steps.contains("agentA"));
    assert!(state.skipped_steps.contains("agentB"));
    assert!(state.completed_steps.contains("end"));
    assert_eq!(result.output, Some(json!("High value 75")));
}

#[tokio::test]
async fn test_condition_false_branch() {
    let agent = Arc::new(MockAgent::new());
    let engine = engine(agent.clone()).await;

    let result = engine
        .execute(&yaml(ROUTER_WORKFLOW), json!({"value": 20}))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(agent.calls(), vec!["agentB"]);
    assert!(result.execution_state.skipped_steps.contains("agentA"));
}

#[tokio::test]
async fn test_loop_stops_at_max_iterations() {
    let engine = engine(Arc::new(MockAgent::new())).await;

    let result = engine
        .execute(&yaml(COUNTING_LOOP), json!({}))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error);
    let state = &result.execution_state;
    assert_eq!(state.iteration_record("loop1").unwrap().iteration, 3);

    let counted: Vec<Value> = state
        .messages
        .iter()
        .filter(|m| m.id == "count")
        .map(|m| m.output.clone())
        .collect();
    assert_eq!(counted, vec![json!(1), json!(2), json!(3)]);

    assert_eq!(state.metadata.notes.len(), 1);
    match &state.metadata.notes[0] {
        MetadataNote::LoopLimitReached {
            node_id,
            iteration,
            max_iterations,
            ..
        } => {
            assert_eq!(node_id, "loop1");
            assert_eq!(*iteration, 3);
            assert_eq!(*max_iterations, 3);
        }
    }
}

#[tokio::test]
async fn test_loop_condition_exits_before_limit() {
    let mut def = yaml(COUNTING_LOOP);
    def.nodes[1].config = json!({
        "maxIterations": 10,
        "condition": "$context.iterationRecord.loop1.iteration < 2"
    });
    let engine = engine(Arc::new(MockAgent::new())).await;

    let result = engine.execute(&def, json!({})).await.unwrap();

    assert!(result.success);
    let state = &result.execution_state;
    assert_eq!(state.messages.iter().filter(|m| m.id == "count").count(), 2);
    assert_eq!(state.iteration_record("loop1").unwrap().iteration, 2);
    assert!(state.metadata.notes.is_empty());
}

#[tokio::test]
async fn test_failure_with_handler_recovers() {
    let agent = Arc::new(MockAgent::new().script("flaky", vec![Err("rejected by business logic")]));
    let engine = engine(agent.clone()).await;

    let result = engine
        .execute(&yaml(GUARDED_AGENT), json!({}))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result.error);
    let state = &result.execution_state;
    assert!(state.failed_steps.contains("flaky"));
    assert!(state.completed_steps.contains("handler"));
    assert!(state.error.is_none());

    let failure = state.failure_of("flaky").unwrap();
    assert_eq!(failure["category"], "business_logic");
    assert!(failure["message"].as_str().unwrap().contains("rejected"));
    assert_eq!(
        result.output,
        Some(json!({"fallback": true, "reason": "business_logic"}))
    );
}

#[tokio::test]
async fn test_unhandled_failure_halts_run() {
    let agent = Arc::new(MockAgent::new().script("first", vec![Err("model refused the request")]));
    let engine = engine(agent.clone()).await;

    let result = engine.execute(&yaml(CHAIN), json!({})).await.unwrap();

    assert!(!result.success);
    assert_eq!(agent.calls(), vec!["first"]);
    let state = &result.execution_state;
    assert!(state.failed_steps.contains("first"));
    assert!(state.skipped_steps.contains("second"));
    assert!(state.skipped_steps.contains("end"));

    let error = state.error.as_ref().unwrap();
    assert_eq!(error.node_id.as_deref(), Some("first"));
    assert_eq!(error.kind, ExecutionErrorKind::NodeExecution);
    assert!(result.error.unwrap().contains("refused"));
}

#[tokio::test]
async fn test_two_start_nodes_are_rejected() {
    let mut def = yaml(CHAIN);
    def.nodes.push(
        serde_json::from_value(json!({"id": "start2", "type": "start"})).unwrap(),
    );
    def.edges
        .push(serde_json::from_value(json!({"source": "start2", "target": "second"})).unwrap());

    let agent = Arc::new(MockAgent::new());
    let engine = engine(agent.clone()).await;

    let report = engine.validate(&def);
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.rule == "exactly-one-start"));

    let err = engine.execute(&def, json!({})).await.unwrap_err();
    match err {
        StepflowError::Validation(v) => assert!(v.has_rule("exactly-one-start")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(agent.calls().is_empty());
}

// ============================================================================
// Expressions and documents
// ============================================================================

#[test]
fn test_sandbox_rejects_host_access() {
    let err = Expression::parse("typeof require").unwrap_err();
    assert!(matches!(err, EvaluationError::Sandbox(_)));

    let mut def = yaml(ROUTER_WORKFLOW);
    def.nodes[1].config = json!({"expression": "typeof require === 'function'"});
    let report = WorkflowLoader::new().import(def).unwrap_err();
    match report {
        StepflowError::Validation(v) => assert!(v.has_rule("invalid-expression")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_export_then_import_is_identity() {
    let loader = WorkflowLoader::new();
    for doc in [ROUTER_WORKFLOW, COUNTING_LOOP, GUARDED_AGENT] {
        let graph = loader.import_yaml(doc).unwrap();
        let exported = WorkflowLoader::export_json(&graph).unwrap();
        let reimported = loader.import_json(&exported).unwrap();
        assert_eq!(reimported, graph);
        assert_eq!(reimported.definition, yaml(doc));
    }
}

// ============================================================================
// Engine behavior
// ============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let agent = Arc::new(MockAgent::new().script(
        "first",
        vec![
            Err("connection reset by peer"),
            Err("connection reset by peer"),
            Ok(json!({"text": "finally"})),
        ],
    ));
    let mut def = yaml(CHAIN);
    def.nodes[1].config = json!({
        "prompt": "one",
        "retry": {"maxRetries": 2, "initialDelayMs": 1, "maxDelayMs": 5}
    });
    let engine = engine(agent.clone()).await;

    let result = engine.execute(&def, json!({})).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(agent.call_count("first"), 3);
    assert_eq!(
        result.execution_state.step_results["first"],
        json!({"text": "finally"})
    );
}

#[tokio::test]
async fn test_permanent_failures_are_not_retried() {
    let agent = Arc::new(MockAgent::new().script("first", vec![Err("invalid prompt")]));
    let mut def = yaml(CHAIN);
    def.nodes[1].config = json!({
        "prompt": "one",
        "retry": {"maxRetries": 3, "initialDelayMs": 1}
    });
    let engine = engine(agent.clone()).await;

    let result = engine.execute(&def, json!({})).await.unwrap();

    assert!(!result.success);
    assert_eq!(agent.call_count("first"), 1);
}

#[tokio::test]
async fn test_cancellation_marks_run_cancelled() {
    let token = CancellationToken::new();
    let agent = Arc::new(MockAgent::new().cancel_on("first", token.clone()));
    let engine = engine(agent.clone()).await;

    let result = engine
        .execute_with_cancel(&yaml(CHAIN), json!({}), token)
        .await
        .unwrap();

    assert!(!result.success);
    let state = &result.execution_state;
    assert!(state.metadata.cancelled);
    assert_eq!(state.error.as_ref().unwrap().kind, ExecutionErrorKind::Cancelled);
    assert_eq!(agent.calls(), vec!["first"]);
    assert!(!state.completed_steps.contains("second"));
}

#[tokio::test]
async fn test_fan_out_joins_and_reduces() {
    let def = yaml(
        r#"
name: Fan Out
state:
  best:
    type: number
    reducer: max
  scores:
    type: array
    reducer: append
nodes:
  - id: start
    type: start
  - id: left
    type: agent
    config:
      outputs: { best: score, scores: score }
  - id: right
    type: agent
    config:
      outputs: { best: score, scores: score }
  - id: join
    type: action
    config:
      actionType: transform
      params:
        value: "{{ $context.best }}"
  - id: end
    type: end
    config:
      output: "{{ $node.join }}"
edges:
  - { source: start, target: left }
  - { source: start, target: right }
  - { source: left, target: join }
  - { source: right, target: join }
  - { source: join, target: end }
"#,
    );
    let agent = Arc::new(
        MockAgent::new()
            .script("left", vec![Ok(json!({"score": 3}))])
            .script("right", vec![Ok(json!({"score": 7}))]),
    );
    let engine = engine(agent.clone()).await;

    let result = engine.execute(&def, json!({})).await.unwrap();

    assert!(result.success, "{:?}", result.error);
    let state = &result.execution_state;
    let position = |id: &str| state.messages.iter().position(|m| m.id == id).unwrap();
    assert!(position("left") < position("join"));
    assert!(position("right") < position("join"));
    assert_eq!(state.messages.iter().filter(|m| m.id == "join").count(), 1);

    assert_eq!(state.context["best"], json!(7));
    let mut scores: Vec<i64> = state.context["scores"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_i64())
        .collect();
    scores.sort();
    assert_eq!(scores, vec![3, 7]);
    assert_eq!(result.output, Some(json!(7)));
}

#[tokio::test]
async fn test_events_are_streamed() {
    let engine = engine(Arc::new(MockAgent::new())).await;
    let (tx, mut rx) = mpsc::channel(256);
    let control = RunControl {
        events: Some(tx),
        ..RunControl::default()
    };

    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    let result = engine
        .execute_with_control(&yaml(ROUTER_WORKFLOW), json!({"value": 99}), control)
        .await
        .unwrap();
    let events = collector.await.unwrap();

    assert!(result.success);
    assert!(events.contains(&ExecutionEvent::BranchTaken {
        node_id: "check".to_string(),
        branch: "true".to_string(),
    }));
    assert!(events.contains(&ExecutionEvent::NodeSkipped {
        node_id: "agentB".to_string(),
    }));
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::RunFinished {
            success: true,
            cancelled: false,
        })
    );
}

#[tokio::test]
async fn test_file_persistence_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let workflows = dir.path().join("workflows");
    std::fs::create_dir_all(&workflows).unwrap();
    std::fs::write(workflows.join("router.yaml"), ROUTER_WORKFLOW).unwrap();

    let config = EngineConfig {
        checkpoints: true,
        data_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let store = Arc::new(FilePersistence::new(dir.path()));
    let engine = engine_with(Arc::new(MockAgent::new()), config)
        .await
        .with_persistence(store.clone());

    let result = engine
        .execute_by_id("router", json!({"value": 51}))
        .await
        .unwrap();
    assert!(result.success);

    let run_id = &result.execution_state.metadata.run_id;
    let saved = store.load_checkpoint(run_id).await.unwrap();
    assert_eq!(saved, result.execution_state);
}

#[tokio::test]
async fn test_unknown_action_fails_the_node() {
    let def = yaml(
        r#"
name: Unknown Action
nodes:
  - { id: start, type: start }
  - { id: act, type: action, config: { actionType: teleport } }
  - { id: end, type: end }
edges:
  - { source: start, target: act }
  - { source: act, target: end }
"#,
    );
    let engine = engine(Arc::new(MockAgent::new())).await;

    let result = engine.execute(&def, json!({})).await.unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("teleport"));
    assert!(result.execution_state.skipped_steps.contains("end"));
}
