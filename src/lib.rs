// SPDX-License-Identifier: MIT

//! Workflow graph execution engine
//!
//! Definitions are compiled into a [`CompiledGraph`](stepflow::workflow::graph::CompiledGraph)
//! and run by a state-machine executor that routes on expressions, bounds
//! loops and recovers failures through error-handler nodes. Agents, actions
//! and storage are supplied through the traits in [`adk`].

pub mod adk;
pub mod stepflow;
