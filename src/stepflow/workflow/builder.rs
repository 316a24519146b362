// SPDX-License-Identifier: MIT

//! Engine - the execute and validate entrypoints
//!
//! The `Engine` owns the collaborators (agent executor, action registry,
//! persistence) and turns definitions into runs:
//!
//! ```text
//! definition --compile--> CompiledGraph --GraphExecutor--> ExecutionResult
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adk::agent::AgentExecutor;
use crate::adk::error::{StepflowError, ValidationError, ValidationIssue};
use crate::adk::persistence::Persistence;
use crate::stepflow::config::EngineConfig;
use crate::stepflow::workflow::graph::{
    CompiledGraph, ExecutionEvent, GraphCompiler, GraphExecutor, RunOptions,
};
use crate::stepflow::workflow::loader::WorkflowLoader;
use crate::stepflow::workflow::registry::ActionRegistry;
use crate::stepflow::workflow::state::ExecutionState;
use crate::stepflow::workflow::types::WorkflowDefinition;

/// Outcome of the validate entrypoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    /// Non-fatal findings, e.g. nodes without an explicit type
    #[serde(default)]
    pub warnings: Vec<ValidationIssue>,
}

impl From<ValidationError> for ValidationReport {
    fn from(err: ValidationError) -> Self {
        Self {
            valid: false,
            errors: err.issues,
            warnings: Vec::new(),
        }
    }
}

/// Outcome of the execute entrypoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_state: ExecutionState,
    /// Human-readable summary when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rendered `output` of the first end node reached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Per-run hooks for callers that need to watch or stop a run
#[derive(Clone, Default)]
pub struct RunControl {
    pub cancel: CancellationToken,
    pub events: Option<mpsc::Sender<ExecutionEvent>>,
    /// Use this run id instead of a fresh one
    pub run_id: Option<String>,
}

/// Workflow engine
pub struct Engine {
    config: EngineConfig,
    compiler: GraphCompiler,
    loader: WorkflowLoader,
    agents: Arc<dyn AgentExecutor>,
    actions: ActionRegistry,
    persistence: Option<Arc<dyn Persistence>>,
}

impl Engine {
    pub fn new(config: EngineConfig, agents: Arc<dyn AgentExecutor>, actions: ActionRegistry) -> Self {
        let compiler = GraphCompiler::new(config.max_iterations);
        Self {
            config,
            loader: WorkflowLoader::with_compiler(compiler.clone()),
            compiler,
            agents,
            actions,
            persistence: None,
        }
    }

    /// Load definitions by id and store checkpoints through `persistence`
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn loader(&self) -> &WorkflowLoader {
        &self.loader
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn persistence(&self) -> Option<&Arc<dyn Persistence>> {
        self.persistence.as_ref()
    }

    /// Check a definition without running it
    pub fn validate(&self, definition: &WorkflowDefinition) -> ValidationReport {
        match self.compile(definition) {
            Ok(graph) => ValidationReport {
                valid: true,
                errors: Vec::new(),
                warnings: graph.warnings,
            },
            Err(err) => err.into(),
        }
    }

    pub fn compile(&self, definition: &WorkflowDefinition) -> Result<CompiledGraph, ValidationError> {
        self.compiler.compile(definition)
    }

    /// Compile and run an inline definition
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
    ) -> Result<ExecutionResult, StepflowError> {
        self.execute_with_control(definition, input, RunControl::default())
            .await
    }

    /// Load a definition through persistence, then run it
    pub async fn execute_by_id(&self, id: &str, input: Value) -> Result<ExecutionResult, StepflowError> {
        let persistence = self.persistence.as_ref().ok_or_else(|| {
            StepflowError::config("no persistence configured to load workflows by id")
        })?;
        let definition = persistence.load_definition(id).await?;
        self.execute(&definition, input).await
    }

    /// Run with a caller-held cancellation token
    pub async fn execute_with_cancel(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, StepflowError> {
        let control = RunControl {
            cancel,
            ..RunControl::default()
        };
        self.execute_with_control(definition, input, control).await
    }

    pub async fn execute_with_control(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        control: RunControl,
    ) -> Result<ExecutionResult, StepflowError> {
        let graph = Arc::new(self.compile(definition)?);
        Ok(self.run_compiled(graph, input, control).await)
    }

    /// Run an already compiled graph; compiled graphs can be reused across runs
    pub async fn run_compiled(
        &self,
        graph: Arc<CompiledGraph>,
        input: Value,
        control: RunControl,
    ) -> ExecutionResult {
        let run_id = control
            .run_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let state = ExecutionState::new(&run_id, &graph.name, input);

        let checkpoints = if self.config.checkpoints {
            self.persistence.clone()
        } else {
            None
        };
        let options = RunOptions {
            max_parallelism: self.config.max_parallelism,
            checkpoints,
            events: control.events,
            cancel: control.cancel,
        };

        let executor = GraphExecutor::new(graph, self.agents.clone(), self.actions.clone());
        let outcome = executor.run(state, &options).await;

        let state = outcome.state;
        ExecutionResult {
            success: state.metadata.success,
            error: state.error.as_ref().map(|e| e.message.clone()),
            output: outcome.output,
            execution_state: state,
        }
    }
}
