// SPDX-License-Identifier: MIT

//! Engine configuration, read from the environment after `.env` is loaded

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::adk::error::StepflowError;
use crate::stepflow::workflow::graph::DEFAULT_MAX_ITERATIONS;

pub const ENV_MAX_ITERATIONS: &str = "STEPFLOW_MAX_ITERATIONS";
pub const ENV_MAX_PARALLELISM: &str = "STEPFLOW_MAX_PARALLELISM";
pub const ENV_CHECKPOINTS: &str = "STEPFLOW_CHECKPOINTS";
pub const ENV_DATA_DIR: &str = "STEPFLOW_DATA_DIR";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "STEPFLOW_HTTP_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Loop bound applied when a loop node sets no `maxIterations`
    pub max_iterations: u64,
    /// Upper bound on nodes dispatched in one round; unbounded when `None`
    pub max_parallelism: Option<usize>,
    /// Checkpoint run state after every round
    pub checkpoints: bool,
    /// Root for file persistence (`workflows/`, `runs/`)
    pub data_dir: PathBuf,
    /// Default timeout of the built-in `http` action
    pub http_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_parallelism: None,
            checkpoints: false,
            data_dir: PathBuf::from(".stepflow"),
            http_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Build from `STEPFLOW_*` variables; unset ones keep their defaults
    pub fn from_env() -> Result<Self, StepflowError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StepflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse::<u64>(&lookup, ENV_MAX_ITERATIONS)? {
            if n == 0 {
                return Err(StepflowError::config(format!(
                    "{} must be a positive integer",
                    ENV_MAX_ITERATIONS
                )));
            }
            config.max_iterations = n;
        }
        if let Some(n) = parse::<usize>(&lookup, ENV_MAX_PARALLELISM)? {
            // 0 means unbounded
            config.max_parallelism = (n > 0).then_some(n);
        }
        if let Some(raw) = lookup(ENV_CHECKPOINTS) {
            config.checkpoints = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(StepflowError::config(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_CHECKPOINTS, other
                    )))
                }
            };
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_HTTP_TIMEOUT_SECS)? {
            config.http_timeout_secs = secs;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, StepflowError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            StepflowError::config(format!("{} has an invalid value '{}'", key, raw))
        }),
    }
}
