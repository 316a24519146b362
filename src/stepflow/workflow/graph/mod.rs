// SPDX-License-Identifier: MIT

//! Graph compilation and execution
//!
//! `compiler` validates a definition into a `CompiledGraph`; `executor` runs
//! it, calling into `router` for condition nodes and `looping` for loop nodes.

mod compiler;
pub mod executor;
pub mod looping;
pub mod router;
pub mod types;

pub use compiler::{compile, GraphCompiler, DEFAULT_MAX_ITERATIONS};
pub use executor::{ExecutionEvent, GraphExecutor, NodeStatus, RunOptions, RunOutcome};
pub use looping::{ExitReason, LoopDecision};
pub use router::BranchDecision;
pub use types::{
    CompiledEdge, CompiledGraph, CompiledNode, EdgeKind, NodeKind, BRANCH_CONTINUE, BRANCH_EXIT,
    BRANCH_FALSE, BRANCH_TRUE,
};
