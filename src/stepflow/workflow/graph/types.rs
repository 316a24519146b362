// SPDX-License-Identifier: MIT

//! Compiled graph types
//!
//! A `CompiledGraph` is the validated, executable form of a
//! `WorkflowDefinition`. It is immutable once built and can be shared by any
//! number of concurrent runs.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::adk::error::ValidationIssue;
use crate::stepflow::workflow::expression::Expression;
use crate::stepflow::workflow::retry::RetryPolicy;
use crate::stepflow::workflow::state::StateSchema;
use crate::stepflow::workflow::types::{NodeType, WorkflowDefinition};

/// Condition branch taken when the expression is truthy
pub const BRANCH_TRUE: &str = "true";
/// Condition branch taken otherwise
pub const BRANCH_FALSE: &str = "false";
/// Loop branch into the body
pub const BRANCH_CONTINUE: &str = "continue";
/// Loop branch out of the loop
pub const BRANCH_EXIT: &str = "exit";

/// Typed per-node behaviour, compiled from `type` + `config`
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start,
    Agent {
        /// Forwarded to the agent executor after interpolation
        config: Value,
        retry: Option<RetryPolicy>,
    },
    Condition {
        expression: Expression,
        /// Branch an unlabeled outgoing edge stands for
        fallback_branch: Option<String>,
    },
    Loop {
        max_iterations: u64,
        /// Continuation test; absent means "keep going until the limit"
        condition: Option<Expression>,
    },
    Action {
        action_type: String,
        params: Value,
        retry: Option<RetryPolicy>,
    },
    ErrorHandler {
        recover: Option<Value>,
    },
    End {
        output: Option<Value>,
    },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Start => NodeType::Start,
            NodeKind::Agent { .. } => NodeType::Agent,
            NodeKind::Condition { .. } => NodeType::Condition,
            NodeKind::Loop { .. } => NodeType::Loop,
            NodeKind::Action { .. } => NodeType::Action,
            NodeKind::ErrorHandler { .. } => NodeType::ErrorHandler,
            NodeKind::End { .. } => NodeType::End,
        }
    }
}

/// A node ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledNode {
    pub id: String,
    pub label: Option<String>,
    pub kind: NodeKind,
    /// Context key to JSON path into this node's output
    pub outputs: BTreeMap<String, String>,
}

impl CompiledNode {
    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// How an edge participates in routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// Activated when the source completes
    Normal,
    /// Activated only when the source picks this branch
    Branch(String),
    /// Activated only when the source fails
    Failure,
}

/// A validated edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    /// Closes a loop body back to its loop node
    pub back_edge: bool,
}

impl CompiledEdge {
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.source, self.target)
    }
}

/// The executable graph
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGraph {
    pub name: String,
    /// Nodes in definition order
    pub nodes: Vec<CompiledNode>,
    pub edges: Vec<CompiledEdge>,
    pub start: String,
    /// Node id to position in `nodes`
    pub(crate) index: BTreeMap<String, usize>,
    /// Node id to incoming forward edges (back-edges excluded)
    pub(crate) incoming: BTreeMap<String, Vec<usize>>,
    /// Node id to outgoing edges
    pub(crate) outgoing: BTreeMap<String, Vec<usize>>,
    /// Loop id to the back-edges that close its body
    pub(crate) back_edges: BTreeMap<String, Vec<usize>>,
    /// Loop id to the nodes of its body
    pub(crate) loop_bodies: BTreeMap<String, BTreeSet<String>>,
    /// Failing node to the error handler wired to it
    pub(crate) error_handlers: BTreeMap<String, String>,
    pub(crate) reachable: BTreeSet<String>,
    pub schema: StateSchema,
    pub warnings: Vec<ValidationIssue>,
    /// The definition this graph was compiled from
    pub definition: WorkflowDefinition,
}

impl CompiledGraph {
    pub fn node(&self, id: &str) -> Option<&CompiledNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn edge(&self, index: usize) -> &CompiledEdge {
        &self.edges[index]
    }

    /// Forward incoming edge indices of a node
    pub fn incoming(&self, id: &str) -> &[usize] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Outgoing edge indices of a node
    pub fn outgoing(&self, id: &str) -> &[usize] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sources of forward incoming edges
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.incoming(id)
            .iter()
            .map(|&e| self.edges[e].source.as_str())
            .collect()
    }

    /// Targets of outgoing edges
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.outgoing(id)
            .iter()
            .map(|&e| self.edges[e].target.as_str())
            .collect()
    }

    /// Target of a labelled branch of a condition or loop node
    pub fn branch_target(&self, id: &str, branch: &str) -> Option<&str> {
        self.outgoing(id).iter().find_map(|&e| match &self.edges[e].kind {
            EdgeKind::Branch(label) if label == branch => Some(self.edges[e].target.as_str()),
            _ => None,
        })
    }

    pub fn back_edges(&self, loop_id: &str) -> &[usize] {
        self.back_edges.get(loop_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn loop_body(&self, loop_id: &str) -> Option<&BTreeSet<String>> {
        self.loop_bodies.get(loop_id)
    }

    /// Innermost loop whose body contains the node
    pub fn enclosing_loop(&self, id: &str) -> Option<&str> {
        self.loop_bodies
            .iter()
            .filter(|(_, body)| body.contains(id))
            .min_by_key(|(_, body)| body.len())
            .map(|(loop_id, _)| loop_id.as_str())
    }

    pub fn error_handler_for(&self, id: &str) -> Option<&str> {
        self.error_handlers.get(id).map(String::as_str)
    }

    pub fn is_reachable(&self, id: &str) -> bool {
        self.reachable.contains(id)
    }

    /// Warnings rendered for run metadata
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}
