// SPDX-License-Identifier: MIT

//! Workflow definition types
//!
//! This is the import/export document format: `{ name, description, nodes,
//! edges }`, plus an optional context schema. Node configuration stays raw
//! JSON here; the graph compiler turns it into typed node kinds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::state::StateSchema;

/// A user-authored workflow graph
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct WorkflowDefinition {
    /// Name of the workflow
    pub name: String,
    /// Description of the workflow
    #[serde(default)]
    pub description: String,
    /// Steps of the graph
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    /// Directed connections between steps
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    /// Context keys with defaults and reducers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSchema>,
}

/// A step in the workflow graph
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct NodeDefinition {
    /// Unique identifier for this node
    pub id: String,
    /// Node type tag: start, agent, condition, loop, action, error_handler, end
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    /// Type-specific configuration
    #[serde(default = "empty_object", skip_serializing_if = "is_empty_object")]
    pub config: Value,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A directed connection, optionally naming the branch it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    /// Branch label, e.g. "true"/"false" or "continue"/"exit"
    #[serde(default, alias = "branch", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The closed set of node type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Agent,
    Condition,
    Loop,
    Action,
    ErrorHandler,
    End,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Agent => "agent",
            NodeType::Condition => "condition",
            NodeType::Loop => "loop",
            NodeType::Action => "action",
            NodeType::ErrorHandler => "error_handler",
            NodeType::End => "end",
        }
    }

    /// Whether a node of this type can transition to `Failed`
    pub fn can_fail(&self) -> bool {
        matches!(
            self,
            NodeType::Agent | NodeType::Condition | NodeType::Loop | NodeType::Action
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(NodeType::Start),
            "agent" => Ok(NodeType::Agent),
            "condition" => Ok(NodeType::Condition),
            "loop" => Ok(NodeType::Loop),
            "action" => Ok(NodeType::Action),
            "error_handler" | "errorHandler" | "error-handler" => Ok(NodeType::ErrorHandler),
            "end" => Ok(NodeType::End),
            other => Err(format!("Unknown node type: {}", other)),
        }
    }
}

impl NodeDefinition {
    /// Convenience constructor used by builders and tests
    pub fn new(id: &str, node_type: NodeType, config: Value) -> Self {
        Self {
            id: id.to_string(),
            node_type: Some(node_type.as_str().to_string()),
            config,
            label: None,
        }
    }
}

impl EdgeDefinition {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            label: None,
        }
    }

    pub fn labeled(source: &str, target: &str, label: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            label: Some(label.to_string()),
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|m| m.is_empty())
}
