// SPDX-License-Identifier: MIT

use crate::adk::action::ActionHandler;
use crate::adk::error::ActionError;
use crate::stepflow::workflow::state::ExecutionState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Action handlers by action type, shared by every run of an engine
#[derive(Clone)]
pub struct ActionRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ActionHandler>>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn ActionHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(handler.name().to_string(), handler);
    }

    pub async fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        let handlers = self.handlers.read().await;
        handlers.get(action_type).cloned()
    }

    /// Registered action types with their descriptions and parameter schemas
    pub async fn describe(&self) -> Vec<Value> {
        let handlers = self.handlers.read().await;
        let mut described: Vec<Value> = handlers
            .values()
            .map(|h| {
                json!({
                    "name": h.name(),
                    "description": h.description(),
                    "schema": h.schema(),
                })
            })
            .collect();
        described.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        described
    }

    /// Dispatch to the handler registered for `action_type`
    pub async fn perform(
        &self,
        action_type: &str,
        params: &Value,
        state: &ExecutionState,
    ) -> Result<Value, ActionError> {
        // Clone the Arc so the lock is not held across the handler's await
        let handler = self
            .get(action_type)
            .await
            .ok_or_else(|| ActionError::UnknownAction(action_type.to_string()))?;
        handler.perform(action_type, params, state).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
