// SPDX-License-Identifier: MIT

//! Graph compiler
//!
//! Turns a `WorkflowDefinition` into a `CompiledGraph`. Every rule is checked
//! and every violation reported; a definition either compiles completely or
//! not at all.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::types::{
    CompiledEdge, CompiledGraph, CompiledNode, EdgeKind, NodeKind, BRANCH_CONTINUE, BRANCH_EXIT,
    BRANCH_FALSE, BRANCH_TRUE,
};
use crate::adk::error::{ValidationError, ValidationIssue};
use crate::stepflow::workflow::expression::{template, Expression};
use crate::stepflow::workflow::retry::RetryPolicy;
use crate::stepflow::workflow::types::{NodeType, WorkflowDefinition};

/// Loop bound used when a loop node does not set `maxIterations`
pub const DEFAULT_MAX_ITERATIONS: u64 = 1000;

/// Compile with default options
pub fn compile(definition: &WorkflowDefinition) -> Result<CompiledGraph, ValidationError> {
    GraphCompiler::default().compile(definition)
}

/// Validates definitions and builds executable graphs
#[derive(Debug, Clone)]
pub struct GraphCompiler {
    default_max_iterations: u64,
}

impl Default for GraphCompiler {
    fn default() -> Self {
        Self {
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl GraphCompiler {
    pub fn new(default_max_iterations: u64) -> Self {
        Self {
            default_max_iterations: default_max_iterations.max(1),
        }
    }

    pub fn compile(&self, definition: &WorkflowDefinition) -> Result<CompiledGraph, ValidationError> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        // ---- nodes -------------------------------------------------------

        let mut types: BTreeMap<String, NodeType> = BTreeMap::new();
        let mut ids: BTreeSet<String> = BTreeSet::new();
        let mut nodes = Vec::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            if !ids.insert(node.id.clone()) {
                issues.push(ValidationIssue::node(
                    &node.id,
                    "unique-node-id",
                    "node id is used more than once",
                ));
                continue;
            }

            let node_type = match node.node_type.as_deref() {
                None => {
                    warnings.push(ValidationIssue::node(
                        &node.id,
                        "implicit-node-type",
                        "node has no type and is treated as an action",
                    ));
                    NodeType::Action
                }
                Some(tag) => match tag.parse::<NodeType>() {
                    Ok(t) => t,
                    Err(e) => {
                        issues.push(ValidationIssue::node(&node.id, "unknown-node-type", e));
                        continue;
                    }
                },
            };
            types.insert(node.id.clone(), node_type);

            match self.compile_node(&node.id, node_type, &node.config) {
                Ok((kind, outputs)) => nodes.push(CompiledNode {
                    id: node.id.clone(),
                    label: node.label.clone(),
                    kind,
                    outputs,
                }),
                Err(mut node_issues) => issues.append(&mut node_issues),
            }
        }

        // ---- edges -------------------------------------------------------

        let mut edges: Vec<CompiledEdge> = Vec::new();
        let mut labels: Vec<Option<String>> = Vec::new();
        for edge in &definition.edges {
            let mut dangling = false;
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint) {
                    dangling = true;
                    issues.push(ValidationIssue::edge(
                        &edge.source,
                        &edge.target,
                        "dangling-edge",
                        format!("edge references unknown node '{}'", endpoint),
                    ));
                }
            }
            if dangling {
                continue;
            }
            let kind = if types.get(&edge.target) == Some(&NodeType::ErrorHandler) {
                EdgeKind::Failure
            } else {
                EdgeKind::Normal
            };
            edges.push(CompiledEdge {
                source: edge.source.clone(),
                target: edge.target.clone(),
                kind,
                back_edge: false,
            });
            labels.push(edge.label.clone());
        }

        let mut outgoing: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut incoming_all: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.source.clone()).or_default().push(i);
            incoming_all.entry(edge.target.clone()).or_default().push(i);
        }
        let in_count = |id: &str| incoming_all.get(id).map_or(0, Vec::len);
        let out_count = |id: &str| outgoing.get(id).map_or(0, Vec::len);

        // ---- start / end -------------------------------------------------

        let starts: Vec<&String> = types
            .iter()
            .filter(|(_, t)| **t == NodeType::Start)
            .map(|(id, _)| id)
            .collect();
        if starts.len() != 1 {
            issues.push(ValidationIssue::graph(
                "exactly-one-start",
                format!("workflow must have exactly one start node, found {}", starts.len()),
            ));
        }
        let ends: Vec<&String> = types
            .iter()
            .filter(|(_, t)| **t == NodeType::End)
            .map(|(id, _)| id)
            .collect();
        if ends.is_empty() {
            issues.push(ValidationIssue::graph(
                "at-least-one-end",
                "workflow must have at least one end node",
            ));
        }

        for (id, node_type) in &types {
            match node_type {
                NodeType::Start if in_count(id) > 0 => issues.push(ValidationIssue::node(
                    id,
                    "start-no-incoming",
                    "start node cannot have incoming edges",
                )),
                NodeType::Start => {}
                _ if in_count(id) == 0 => issues.push(ValidationIssue::node(
                    id,
                    "has-incoming",
                    "node has no incoming edge",
                )),
                _ => {}
            }
            match node_type {
                NodeType::End if out_count(id) > 0 => issues.push(ValidationIssue::node(
                    id,
                    "end-no-outgoing",
                    "end node cannot have outgoing edges",
                )),
                NodeType::End => {}
                _ if out_count(id) == 0 => issues.push(ValidationIssue::node(
                    id,
                    "has-outgoing",
                    "node has no outgoing edge",
                )),
                _ => {}
            }
        }

        // ---- error handlers ---------------------------------------------

        let mut error_handlers: BTreeMap<String, String> = BTreeMap::new();
        for (id, node_type) in &types {
            if *node_type != NodeType::ErrorHandler {
                continue;
            }
            let sources: Vec<&CompiledEdge> = incoming_all
                .get(id)
                .map(|v| v.iter().map(|&i| &edges[i]).collect())
                .unwrap_or_default();
            if sources.len() != 1 {
                if !sources.is_empty() {
                    issues.push(ValidationIssue::node(
                        id,
                        "error-handler-source",
                        format!("error handler must have exactly one incoming edge, found {}", sources.len()),
                    ));
                }
                continue;
            }
            let source = &sources[0].source;
            let source_type = types.get(source).copied();
            if !source_type.is_some_and(|t| t.can_fail()) {
                issues.push(ValidationIssue::edge(
                    source,
                    id,
                    "error-handler-source",
                    "error handler must be wired from an agent, action, condition or loop node",
                ));
                continue;
            }
            if let Some(existing) = error_handlers.insert(source.clone(), id.clone()) {
                issues.push(ValidationIssue::node(
                    source,
                    "error-handler-source",
                    format!("node already has error handler '{}'", existing),
                ));
            }
        }

        // ---- branches ----------------------------------------------------

        for node in &nodes {
            let routed: Vec<usize> = outgoing
                .get(&node.id)
                .map(|v| {
                    v.iter()
                        .copied()
                        .filter(|&i| edges[i].kind != EdgeKind::Failure)
                        .collect()
                })
                .unwrap_or_default();

            match &node.kind {
                NodeKind::Condition {
                    fallback_branch, ..
                } => {
                    let resolved = resolve_branches(
                        &node.id,
                        &routed,
                        &edges,
                        &labels,
                        &[BRANCH_TRUE, BRANCH_FALSE],
                        fallback_branch.as_deref(),
                        "condition-branches",
                        &mut issues,
                    );
                    for (i, label) in resolved {
                        edges[i].kind = EdgeKind::Branch(label);
                    }
                }
                NodeKind::Loop { .. } => {
                    let resolved = resolve_branches(
                        &node.id,
                        &routed,
                        &edges,
                        &labels,
                        &[BRANCH_CONTINUE, BRANCH_EXIT],
                        None,
                        "loop-branches",
                        &mut issues,
                    );
                    for (i, label) in resolved {
                        edges[i].kind = EdgeKind::Branch(label);
                    }
                }
                _ => {}
            }
        }

        // ---- loop bodies -------------------------------------------------

        let mut loop_bodies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut back_edges: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for node in nodes.iter().filter(|n| n.node_type() == NodeType::Loop) {
            let branch = |label: &str| {
                outgoing.get(&node.id).and_then(|v| {
                    v.iter().copied().find(|&i| {
                        matches!(&edges[i].kind, EdgeKind::Branch(l) if l == label)
                    })
                })
            };
            let (Some(cont), Some(exit)) = (branch(BRANCH_CONTINUE), branch(BRANCH_EXIT)) else {
                continue;
            };
            let body = forward_closure(&edges[cont].target, &node.id, &edges, &outgoing);
            let closing: Vec<usize> = body
                .iter()
                .flat_map(|id| outgoing.get(id).into_iter().flatten().copied())
                .filter(|&i| edges[i].target == node.id)
                .collect();

            if closing.is_empty() {
                issues.push(ValidationIssue::node(
                    &node.id,
                    "loop-back-edge",
                    "loop body never leads back to the loop node",
                ));
            }
            let exit_target = &edges[exit].target;
            if body.contains(exit_target) {
                issues.push(ValidationIssue::node(
                    &node.id,
                    "loop-body-escape",
                    format!("loop body reaches exit target '{}' without passing the loop", exit_target),
                ));
            }
            for escaped in body.iter().filter(|id| types.get(*id) == Some(&NodeType::End)) {
                issues.push(ValidationIssue::node(
                    &node.id,
                    "loop-body-escape",
                    format!("loop body reaches end node '{}' without passing the loop", escaped),
                ));
            }

            for &i in &closing {
                edges[i].back_edge = true;
            }
            back_edges.insert(node.id.clone(), closing);
            loop_bodies.insert(node.id.clone(), body);
        }

        // ---- cycles ------------------------------------------------------

        if let Some(stuck) = find_illegal_cycle(&ids, &edges) {
            issues.push(ValidationIssue::graph(
                "illegal-cycle",
                format!(
                    "cycle not formed by a loop back-edge through: {}",
                    stuck.into_iter().collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        // ---- reachability ------------------------------------------------

        let mut reachable = BTreeSet::new();
        if let [start] = starts.as_slice() {
            reachable = reach(start, &edges, |e| (&e.source, &e.target));
            for id in &ids {
                if !reachable.contains(id) {
                    issues.push(ValidationIssue::node(
                        id,
                        "reachable-from-start",
                        "node cannot be reached from the start node",
                    ));
                }
            }
        }
        if !ends.is_empty() {
            let mut finishing = BTreeSet::new();
            for end in &ends {
                finishing.extend(reach(end, &edges, |e| (&e.target, &e.source)));
            }
            for (id, node_type) in &types {
                if *node_type != NodeType::End && !finishing.contains(id) {
                    issues.push(ValidationIssue::node(
                        id,
                        "path-to-end",
                        "no path from this node reaches an end node",
                    ));
                }
            }
        }

        if !issues.is_empty() {
            log::debug!(
                "Workflow '{}' failed validation with {} issue(s)",
                definition.name,
                issues.len()
            );
            return Err(ValidationError::new(issues));
        }

        let mut incoming: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, edge) in edges.iter().enumerate() {
            if !edge.back_edge {
                incoming.entry(edge.target.clone()).or_default().push(i);
            }
        }
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        for warning in &warnings {
            log::warn!("Workflow '{}': {}", definition.name, warning);
        }

        Ok(CompiledGraph {
            name: definition.name.clone(),
            start: starts[0].clone(),
            nodes,
            edges,
            index,
            incoming,
            outgoing,
            back_edges,
            loop_bodies,
            error_handlers,
            reachable,
            schema: definition.state.clone().unwrap_or_default(),
            warnings,
            definition: definition.clone(),
        })
    }

    fn compile_node(
        &self,
        id: &str,
        node_type: NodeType,
        config: &Value,
    ) -> Result<(NodeKind, BTreeMap<String, String>), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        let invalid = |message: String| ValidationIssue::node(id, "invalid-config", message);

        let Some(map) = config.as_object() else {
            return Err(vec![invalid("config must be an object".to_string())]);
        };

        let outputs = match map.get("outputs") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(raw)) => {
                let mut outputs = BTreeMap::new();
                for (key, path) in raw {
                    match path.as_str() {
                        Some(p) => {
                            outputs.insert(key.clone(), p.to_string());
                        }
                        None => issues.push(invalid(format!("output '{}' must map to a path string", key))),
                    }
                }
                outputs
            }
            Some(_) => {
                issues.push(invalid("outputs must be an object".to_string()));
                BTreeMap::new()
            }
        };

        let retry = match RetryPolicy::from_config(config) {
            Ok(policy) => policy,
            Err(e) => {
                issues.push(invalid(e));
                None
            }
        };

        let mut check_templates = |value: &Value, what: &str| {
            if let Err((path, e)) = template::check_value(value) {
                let location = if path.is_empty() {
                    what.to_string()
                } else {
                    format!("{}.{}", what, path)
                };
                issues.push(ValidationIssue::node(
                    id,
                    "invalid-expression",
                    format!("{}: {}", location, e),
                ));
            }
        };

        let kind = match node_type {
            NodeType::Start => NodeKind::Start,
            NodeType::Agent => {
                let forwarded: Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != "retry" && k.as_str() != "outputs")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let forwarded = Value::Object(forwarded);
                check_templates(&forwarded, "config");
                NodeKind::Agent {
                    config: forwarded,
                    retry,
                }
            }
            NodeType::Action => {
                let action_type = map
                    .get("actionType")
                    .or_else(|| map.get("action"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let params = map
                    .get("params")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                check_templates(&params, "params");
                match action_type {
                    Some(action_type) => NodeKind::Action {
                        action_type,
                        params,
                        retry,
                    },
                    None => {
                        issues.push(invalid("action node requires a string 'actionType'".to_string()));
                        return Err(issues);
                    }
                }
            }
            NodeType::Condition => {
                let source = map.get("expression").or_else(|| map.get("condition"));
                let fallback_branch = match map.get("fallbackBranch") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(b)) if b == BRANCH_TRUE || b == BRANCH_FALSE => Some(b.clone()),
                    Some(Value::Bool(b)) => Some(b.to_string()),
                    Some(other) => {
                        issues.push(invalid(format!(
                            "fallbackBranch must be \"true\" or \"false\", got {}",
                            other
                        )));
                        None
                    }
                };
                match source {
                    Some(Value::String(text)) => match Expression::parse(text) {
                        Ok(expression) => NodeKind::Condition {
                            expression,
                            fallback_branch,
                        },
                        Err(e) => {
                            issues.push(ValidationIssue::node(
                                id,
                                "invalid-expression",
                                format!("expression: {}", e),
                            ));
                            return Err(issues);
                        }
                    },
                    _ => {
                        issues.push(invalid("condition node requires a string 'expression'".to_string()));
                        return Err(issues);
                    }
                }
            }
            NodeType::Loop => {
                let max_iterations = match map.get("maxIterations") {
                    None | Some(Value::Null) => self.default_max_iterations,
                    Some(raw) => match raw.as_u64() {
                        Some(n) if n > 0 => n,
                        _ => {
                            issues.push(invalid(format!(
                                "maxIterations must be a positive integer, got {}",
                                raw
                            )));
                            self.default_max_iterations
                        }
                    },
                };
                let condition = match map.get("condition").or_else(|| map.get("expression")) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(text)) => match Expression::parse(text) {
                        Ok(expression) => Some(expression),
                        Err(e) => {
                            issues.push(ValidationIssue::node(
                                id,
                                "invalid-expression",
                                format!("condition: {}", e),
                            ));
                            None
                        }
                    },
                    Some(other) => {
                        issues.push(invalid(format!("loop condition must be a string, got {}", other)));
                        None
                    }
                };
                NodeKind::Loop {
                    max_iterations,
                    condition,
                }
            }
            NodeType::ErrorHandler => {
                let recover = map.get("recover").cloned();
                if let Some(value) = &recover {
                    check_templates(value, "recover");
                }
                NodeKind::ErrorHandler { recover }
            }
            NodeType::End => {
                let output = map.get("output").cloned();
                if let Some(value) = &output {
                    check_templates(value, "output");
                }
                NodeKind::End { output }
            }
        };

        if issues.is_empty() {
            Ok((kind, outputs))
        } else {
            Err(issues)
        }
    }
}

/// Assign branch labels to the routed edges of a condition or loop node
#[allow(clippy::too_many_arguments)]
fn resolve_branches(
    node_id: &str,
    routed: &[usize],
    edges: &[CompiledEdge],
    labels: &[Option<String>],
    expected: &[&str; 2],
    fallback: Option<&str>,
    rule: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<(usize, String)> {
    let mut resolved = Vec::new();
    for &i in routed {
        let label = match labels[i].as_deref() {
            Some(l) if expected.contains(&l) => l.to_string(),
            Some(other) => {
                issues.push(ValidationIssue::edge(
                    &edges[i].source,
                    &edges[i].target,
                    rule,
                    format!("unexpected branch label '{}', expected one of {:?}", other, expected),
                ));
                continue;
            }
            None => match fallback {
                Some(f) => f.to_string(),
                None => {
                    issues.push(ValidationIssue::edge(
                        &edges[i].source,
                        &edges[i].target,
                        rule,
                        format!("edge needs a branch label, one of {:?}", expected),
                    ));
                    continue;
                }
            },
        };
        resolved.push((i, label));
    }

    for branch in expected {
        let count = resolved.iter().filter(|(_, l)| l == branch).count();
        if count != 1 {
            issues.push(ValidationIssue::node(
                node_id,
                rule,
                format!("expected exactly one '{}' edge, found {}", branch, count),
            ));
        }
    }
    if routed.len() != 2 {
        issues.push(ValidationIssue::node(
            node_id,
            rule,
            format!("expected exactly two outgoing branch edges, found {}", routed.len()),
        ));
    }
    resolved
}

/// Nodes reachable from `entry` without expanding `barrier`
fn forward_closure(
    entry: &str,
    barrier: &str,
    edges: &[CompiledEdge],
    outgoing: &BTreeMap<String, Vec<usize>>,
) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    if entry == barrier {
        return seen;
    }
    let mut queue = VecDeque::from([entry.to_string()]);
    seen.insert(entry.to_string());
    while let Some(id) = queue.pop_front() {
        for &i in outgoing.get(&id).into_iter().flatten() {
            let next = &edges[i].target;
            if next != barrier && seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    seen
}

/// Breadth-first reachability following `direction(edge) = (from, to)`
fn reach<'e>(
    origin: &str,
    edges: &'e [CompiledEdge],
    direction: impl Fn(&'e CompiledEdge) -> (&'e String, &'e String),
) -> BTreeSet<String> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for edge in edges {
        let (from, to) = direction(edge);
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }
    let mut seen = BTreeSet::from([origin.to_string()]);
    let mut queue = VecDeque::from([origin.to_string()]);
    while let Some(id) = queue.pop_front() {
        for next in adjacency.get(id.as_str()).into_iter().flatten() {
            if seen.insert(next.to_string()) {
                queue.push_back(next.to_string());
            }
        }
    }
    seen
}

/// Kahn's algorithm over forward edges; returns the nodes left on a cycle
fn find_illegal_cycle(ids: &BTreeSet<String>, edges: &[CompiledEdge]) -> Option<BTreeSet<String>> {
    let mut in_degree: BTreeMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for edge in edges.iter().filter(|e| !e.back_edge) {
        *in_degree.entry(edge.target.as_str()).or_default() += 1;
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for next in adjacency.get(id).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if visited == in_degree.len() {
        None
    } else {
        Some(
            in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .collect(),
        )
    }
}
