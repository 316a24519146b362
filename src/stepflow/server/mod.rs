// SPDX-License-Identifier: MIT

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adk::error::StepflowError;
use crate::stepflow::workflow::builder::{Engine, RunControl, ValidationReport};
use crate::stepflow::workflow::loader::WorkflowLoader;
use crate::stepflow::workflow::types::WorkflowDefinition;

type AppState = Arc<Engine>;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/actions", get(list_actions))
        .route("/api/validate", post(validate_workflow))
        .route("/api/import", post(import_workflow))
        .route("/api/executions", post(create_execution))
        .route("/api/executions/stream", post(stream_execution))
        .route("/api/checkpoints/{run_id}", get(get_checkpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn serve(engine: Arc<Engine>, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(engine);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Maps engine errors onto HTTP statuses
struct ApiError(StepflowError);

impl From<StepflowError> for ApiError {
    fn from(err: StepflowError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            StepflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StepflowError::NotFound(_) => StatusCode::NOT_FOUND,
            StepflowError::Json(_) | StepflowError::Yaml(_) | StepflowError::Evaluation(_) => {
                StatusCode::BAD_REQUEST
            }
            StepflowError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.0 {
            StepflowError::Validation(err) => json!(ValidationReport::from(err)),
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            log::error!("Request failed with {}: {}", status, body);
        }
        (status, Json(body)).into_response()
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_actions(State(engine): State<AppState>) -> Json<Value> {
    Json(json!(engine.actions().describe().await))
}

async fn validate_workflow(
    State(engine): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Json<ValidationReport> {
    Json(engine.validate(&definition))
}

#[derive(Deserialize)]
struct ImportRequest {
    content: String,
    /// `json` or `yaml`; sniffed from the content when absent
    #[serde(default)]
    format: Option<String>,
}

/// Validate a document and hand back its canonical JSON form
async fn import_workflow(
    State(engine): State<AppState>,
    Json(payload): Json<ImportRequest>,
) -> Result<Json<Value>, ApiError> {
    let is_json = match payload.format.as_deref() {
        Some(format) => format.eq_ignore_ascii_case("json"),
        None => payload.content.trim_start().starts_with('{'),
    };
    let loader = engine.loader();
    let graph = if is_json {
        loader.import_json(&payload.content)?
    } else {
        loader.import_yaml(&payload.content)?
    };
    let definition: Value = serde_json::from_str(&WorkflowLoader::export_json(&graph)?)
        .map_err(StepflowError::from)?;

    Ok(Json(json!({
        "valid": true,
        "warnings": graph.warnings,
        "definition": definition,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionRequest {
    /// Inline definition; takes precedence over `workflowId`
    #[serde(default)]
    workflow: Option<WorkflowDefinition>,
    #[serde(default)]
    workflow_id: Option<String>,
    #[serde(default)]
    input: Value,
}

impl ExecutionRequest {
    async fn definition(&mut self, engine: &Engine) -> Result<WorkflowDefinition, StepflowError> {
        if let Some(definition) = self.workflow.take() {
            return Ok(definition);
        }
        let id = self
            .workflow_id
            .as_deref()
            .ok_or_else(|| StepflowError::other("expected 'workflow' or 'workflowId'"))?;
        let persistence = engine.persistence().ok_or_else(|| {
            StepflowError::config("no persistence configured to load workflows by id")
        })?;
        persistence.load_definition(id).await
    }
}

async fn create_execution(
    State(engine): State<AppState>,
    Json(mut payload): Json<ExecutionRequest>,
) -> Result<Json<Value>, ApiError> {
    let definition = payload.definition(&engine).await?;
    let result = engine.execute(&definition, payload.input).await?;
    Ok(Json(json!(result)))
}

async fn stream_execution(
    State(engine): State<AppState>,
    Json(mut payload): Json<ExecutionRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::channel::<Event>(100);

    tokio::spawn(async move {
        let definition = match payload.definition(&engine).await {
            Ok(definition) => definition,
            Err(e) => {
                log::warn!("Cannot start streaming execution: {}", e);
                let _ = tx.send(error_event(&e)).await;
                return;
            }
        };
        log::info!("Starting streaming execution for workflow: {}", definition.name);

        let (events_tx, mut events_rx) = mpsc::channel(100);
        let control = RunControl {
            events: Some(events_tx),
            ..RunControl::default()
        };

        let out = tx.clone();
        let forward = async move {
            while let Some(event) = events_rx.recv().await {
                match Event::default().event("execution").json_data(&event) {
                    Ok(event) => {
                        if out.send(event).await.is_err() {
                            log::debug!("Stream client went away, dropping events");
                            break;
                        }
                    }
                    Err(e) => log::warn!("Failed to encode execution event: {}", e),
                }
            }
        };
        let run = engine.execute_with_control(&definition, payload.input, control);
        let (result, ()) = tokio::join!(run, forward);

        let final_event = match result {
            Ok(result) => Event::default().event("result").json_data(&result),
            Err(e) => Ok(error_event(&e)),
        };
        match final_event {
            Ok(event) => {
                let _ = tx.send(event).await;
            }
            Err(e) => log::error!("Failed to encode execution result: {}", e),
        }
        log::info!("Streaming execution finished");
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Event, axum::Error>);

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(1)))
}

fn error_event(err: &StepflowError) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": err.to_string() }).to_string())
}

async fn get_checkpoint(
    State(engine): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let persistence = engine
        .persistence()
        .ok_or_else(|| StepflowError::config("no persistence configured"))?;
    let state = persistence.load_checkpoint(&run_id).await?;
    Ok(Json(json!(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::{ValidationError, ValidationIssue};

    #[test]
    fn test_error_statuses() {
        let validation = ApiError(StepflowError::Validation(ValidationError::new(vec![
            ValidationIssue::graph("exactly-one-start", "two start nodes"),
        ])));
        assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            ApiError(StepflowError::not_found("run 'x'")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(StepflowError::config("none")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(StepflowError::other("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_validation_error_body_is_a_report() {
        let err = ApiError(StepflowError::Validation(ValidationError::new(vec![
            ValidationIssue::node("a", "reachable-from-start", "not reachable from start"),
        ])));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["valid"], json!(false));
        assert_eq!(body["errors"][0]["rule"], json!("reachable-from-start"));
    }
}
