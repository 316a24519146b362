// SPDX-License-Identifier: MIT

//! The `state:` block of a workflow document
//!
//! Declares context keys up front. A declared key may carry a value seeded at
//! run start and a reducer that decides how concurrent node outputs landing on
//! the same key are combined at a join.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared context keys, by name
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, JsonSchema)]
pub struct StateSchema {
    #[serde(flatten)]
    pub fields: BTreeMap<String, ContextField>,
}

/// One declared context key
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct ContextField {
    /// Informational; values are not checked against it at run time
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "is_overwrite")]
    pub reducer: ReducerType,
    /// Seeded into the context before the start node runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

/// How a node output is folded into an existing context value
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Last writer wins
    #[default]
    Overwrite,
    /// Arrays are concatenated, scalars pushed
    Append,
    /// Numeric high-water mark
    Max,
    /// Numeric low-water mark
    Min,
    /// Top-level keys of both objects, newer on conflict
    Merge,
}

fn is_overwrite(reducer: &ReducerType) -> bool {
    *reducer == ReducerType::Overwrite
}

impl StateSchema {
    /// Reducer for a context key, `Overwrite` when the key is undeclared
    pub fn reducer_for(&self, key: &str) -> ReducerType {
        self.fields
            .get(key)
            .map(|field| field.reducer)
            .unwrap_or_default()
    }

    /// Keys that are seeded at run start, with their values
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.fields
            .iter()
            .filter_map(|(name, field)| field.default.as_ref().map(|value| (name.as_str(), value)))
    }
}
