// SPDX-License-Identifier: MIT

//! State management for workflow runs
//!
//! This module provides:
//! - `StateSchema` - declares context keys, their defaults and reducers
//! - `ExecutionState` - the per-run record with trace, context and results
//! - `ReducerType` - strategies for merging node outputs into the context

mod schema;
mod store;

pub use schema::{ContextField, FieldKind, ReducerType, StateSchema};
pub use store::{
    ExecutionError, ExecutionErrorKind, ExecutionState, IterationRecord, MetadataNote,
    RunMetadata, StepMessage, StepStatus, ERRORS_KEY, ITERATION_RECORD_KEY,
};
