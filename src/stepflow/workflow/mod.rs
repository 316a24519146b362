// SPDX-License-Identifier: MIT

pub mod builder;
pub mod expression;
pub mod graph;
pub mod loader;
pub mod persistence;
pub mod registry;
pub mod retry;
pub mod state;
pub mod types;
