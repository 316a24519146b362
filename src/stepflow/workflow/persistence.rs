// SPDX-License-Identifier: MIT

//! Persistence implementations
//!
//! - `InMemoryPersistence` keeps definitions and checkpoints in memory
//! - `FilePersistence` reads definitions from `<root>/workflows/<id>.{json,yaml,yml}`
//!   and writes checkpoints to `<root>/runs/<run_id>/checkpoint.json`

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use super::loader::WorkflowLoader;
use super::state::ExecutionState;
use super::types::WorkflowDefinition;
use crate::adk::error::StepflowError;
use crate::adk::persistence::Persistence;

#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    definitions: Arc<RwLock<HashMap<String, WorkflowDefinition>>>,
    checkpoints: Arc<RwLock<HashMap<String, ExecutionState>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_definition(&self, id: &str, definition: WorkflowDefinition) {
        let mut definitions = self.definitions.write().await;
        definitions.insert(id.to_string(), definition);
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load_definition(&self, id: &str) -> Result<WorkflowDefinition, StepflowError> {
        let definitions = self.definitions.read().await;
        definitions
            .get(id)
            .cloned()
            .ok_or_else(|| StepflowError::not_found(format!("workflow '{}'", id)))
    }

    async fn save_checkpoint(
        &self,
        run_id: &str,
        state: &ExecutionState,
    ) -> Result<(), StepflowError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(run_id.to_string(), state.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, run_id: &str) -> Result<ExecutionState, StepflowError> {
        let checkpoints = self.checkpoints.read().await;
        checkpoints
            .get(run_id)
            .cloned()
            .ok_or_else(|| StepflowError::not_found(format!("checkpoint for run '{}'", run_id)))
    }
}

/// Directory-backed persistence
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_path(&self, run_id: &str) -> Result<PathBuf, StepflowError> {
        Ok(self
            .root
            .join("runs")
            .join(safe_segment(run_id)?)
            .join("checkpoint.json"))
    }
}

/// Ids become path segments, so they must not be able to leave the root
fn safe_segment(id: &str) -> Result<&str, StepflowError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(id)
    } else {
        Err(StepflowError::other(format!("invalid id '{}'", id)))
    }
}

async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StepflowError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn load_definition(&self, id: &str) -> Result<WorkflowDefinition, StepflowError> {
        let dir = self.root.join("workflows");
        let id = safe_segment(id)?;
        for ext in ["json", "yaml", "yml"] {
            let path = dir.join(format!("{}.{}", id, ext));
            match fs::read_to_string(&path).await {
                Ok(content) if ext == "json" => return WorkflowLoader::parse_json(&content),
                Ok(content) => return WorkflowLoader::parse_yaml(&content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StepflowError::not_found(format!(
            "workflow '{}' in {}",
            id,
            dir.display()
        )))
    }

    async fn save_checkpoint(
        &self,
        run_id: &str,
        state: &ExecutionState,
    ) -> Result<(), StepflowError> {
        let path = self.checkpoint_path(run_id)?;
        let content = serde_json::to_vec_pretty(state)?;
        atomic_write(&path, &content).await
    }

    async fn load_checkpoint(&self, run_id: &str) -> Result<ExecutionState, StepflowError> {
        let path = self.checkpoint_path(run_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StepflowError::not_found(format!(
                    "checkpoint for run '{}'",
                    run_id
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}
