// SPDX-License-Identifier: MIT

//! Workflow loader - import and export of workflow documents
//!
//! Documents are `{ name, description, nodes, edges }` in JSON or YAML.
//! Importing compiles the document, so an invalid graph never gets past this
//! point.

use super::graph::{CompiledGraph, GraphCompiler};
use super::types::WorkflowDefinition;
use crate::adk::error::StepflowError;
use std::fs;
use std::path::Path;

/// Imports, validates and exports workflow definitions
#[derive(Debug, Clone, Default)]
pub struct WorkflowLoader {
    compiler: GraphCompiler,
}

impl WorkflowLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compiler(compiler: GraphCompiler) -> Self {
        Self { compiler }
    }

    /// Load and compile a workflow file; `.json` is read as JSON, anything
    /// else as YAML
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<CompiledGraph, StepflowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        log::debug!("Loading workflow from {}", path.display());
        if path.extension().is_some_and(|ext| ext == "json") {
            self.import_json(&content)
        } else {
            self.import_yaml(&content)
        }
    }

    /// Parse a definition from a JSON string without compiling it
    pub fn parse_json(content: &str) -> Result<WorkflowDefinition, StepflowError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse a definition from a YAML string without compiling it
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition, StepflowError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn import_json(&self, content: &str) -> Result<CompiledGraph, StepflowError> {
        self.import(Self::parse_json(content)?)
    }

    pub fn import_yaml(&self, content: &str) -> Result<CompiledGraph, StepflowError> {
        self.import(Self::parse_yaml(content)?)
    }

    /// Validate a parsed definition the same way execution would
    pub fn import(&self, definition: WorkflowDefinition) -> Result<CompiledGraph, StepflowError> {
        Ok(self.compiler.compile(&definition)?)
    }

    /// Write a compiled workflow back out as a JSON document
    pub fn export_json(graph: &CompiledGraph) -> Result<String, StepflowError> {
        Ok(serde_json::to_string_pretty(&graph.definition)?)
    }

    pub fn export_yaml(graph: &CompiledGraph) -> Result<String, StepflowError> {
        Ok(serde_yaml::to_string(&graph.definition)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Write;

    const ROUTER_YAML: &str = r#"
name: Router
description: "Routes on value"
state:
  summary:
    type: string
nodes:
  - id: start
    type: start
  - id: check
    type: condition
    config:
      expression: "{{ $input.value > 50 }}"
  - id: agentA
    type: agent
    label: High
    config:
      prompt: "High value {{ $input.value }}"
      retry:
        maxRetries: 2
      outputs:
        summary: text
  - id: agentB
    type: agent
    config:
      prompt: "Low value"
  - id: end
    type: end
edges:
  - { source: start, target: check }
  - { source: check, target: agentA, label: "true" }
  - { source: check, target: agentB, label: "false" }
  - { source: agentA, target: end }
  - { source: agentB, target: end }
"#;

    #[test]
    fn test_import_yaml_compiles() {
        let graph = WorkflowLoader::new().import_yaml(ROUTER_YAML).unwrap();
        assert_eq!(graph.name, "Router");
        assert_eq!(graph.branch_target("check", "true"), Some("agentA"));
        assert!(graph.schema.fields.contains_key("summary"));
    }

    #[test]
    fn test_import_rejects_invalid_graph() {
        let doc = json!({
            "name": "broken",
            "nodes": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "start"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"source": "s1", "target": "end"},
                {"source": "s2", "target": "end"}
            ]
        });
        let err = WorkflowLoader::new()
            .import_json(&doc.to_string())
            .unwrap_err();
        match err {
            StepflowError::Validation(v) => assert!(v.has_rule("exactly-one-start")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_import_rejects_malformed_json() {
        let err = WorkflowLoader::new().import_json("{ not json").unwrap_err();
        assert!(matches!(err, StepflowError::Json(_)));
    }

    #[test]
    fn test_export_import_reproduces_document_and_graph() {
        let loader = WorkflowLoader::new();
        let graph = loader.import_yaml(ROUTER_YAML).unwrap();
        let exported = WorkflowLoader::export_json(&graph).unwrap();

        let original: Value =
            serde_json::to_value(WorkflowLoader::parse_yaml(ROUTER_YAML).unwrap()).unwrap();
        let round_tripped: Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(round_tripped, original);

        let reimported = loader.import_json(&exported).unwrap();
        assert_eq!(reimported, graph);

        let via_yaml = loader
            .import_yaml(&WorkflowLoader::export_yaml(&graph).unwrap())
            .unwrap();
        assert_eq!(via_yaml, graph);
    }

    #[test]
    fn test_load_workflow_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("router.yaml");
        fs::File::create(&yaml_path)
            .unwrap()
            .write_all(ROUTER_YAML.as_bytes())
            .unwrap();
        let graph = WorkflowLoader::new().load_workflow(&yaml_path).unwrap();

        let json_path = dir.path().join("router.json");
        fs::write(&json_path, WorkflowLoader::export_json(&graph).unwrap()).unwrap();
        let from_json = WorkflowLoader::new().load_workflow(&json_path).unwrap();
        assert_eq!(from_json, graph);

        let missing = WorkflowLoader::new().load_workflow(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(StepflowError::Io(_))));
    }
}
