// SPDX-License-Identifier: MIT

//! Built-in action handlers: `http`, `transform` and `wait`

pub mod http;
pub mod transform;
pub mod wait;

use std::sync::Arc;
use std::time::Duration;

use crate::adk::action::ActionHandler;
use crate::stepflow::config::EngineConfig;
use crate::stepflow::workflow::registry::ActionRegistry;

pub use http::HttpAction;
pub use transform::TransformAction;
pub use wait::WaitAction;

pub fn create_actions(config: &EngineConfig) -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(HttpAction::new(Duration::from_secs(config.http_timeout_secs))),
        Arc::new(TransformAction),
        Arc::new(WaitAction),
    ]
}

/// Register every built-in action in `registry`
pub async fn register_builtin(registry: &ActionRegistry, config: &EngineConfig) {
    for action in create_actions(config) {
        log::debug!("Registered action: {}", action.name());
        registry.register(action).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_builtin() {
        let registry = ActionRegistry::new();
        register_builtin(&registry, &EngineConfig::default()).await;
        let names: Vec<String> = registry
            .describe()
            .await
            .iter()
            .map(|d| d["name"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, vec!["http", "transform", "wait"]);
    }
}
