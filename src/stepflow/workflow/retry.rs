// SPDX-License-Identifier: MIT

//! Retry with exponential backoff for agent and action nodes
//!
//! Configured per node:
//!
//! ```yaml
//! config:
//!   retry:
//!     maxRetries: 3
//!     initialDelayMs: 500
//!     maxDelayMs: 10000
//!     backoff: 2.0
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::adk::error::{DelegateError, ErrorCategory};

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff() -> f64 {
    2.0
}

/// How often and how patiently to retry a failing delegate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    /// Spread delays by up to 10% so parallel retries do not align
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: default_backoff(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Read the `retry` key of a node config, if present
    pub fn from_config(config: &Value) -> Result<Option<Self>, String> {
        match config.get("retry") {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => {
                let policy: RetryPolicy = serde_json::from_value(raw.clone())
                    .map_err(|e| format!("invalid retry policy: {}", e))?;
                if !policy.backoff.is_finite() || policy.backoff < 1.0 {
                    return Err("retry backoff must be a number >= 1".to_string());
                }
                Ok(Some(policy))
            }
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff.powi(exponent);
        let mut delay = base.min(self.max_delay_ms as f64);
        if self.jitter {
            let spread = ((retry as u64 * 7_919) % 1_000) as f64 / 1_000.0 * 2.0 - 1.0;
            delay = (delay + 0.1 * delay * spread).max(0.0);
        }
        Duration::from_millis(delay as u64)
    }

    /// Whether a failure of this category is worth another attempt
    pub fn retries(&self, category: ErrorCategory) -> bool {
        self.max_retries > 0 && category.is_transient()
    }

    /// Run `attempt` until it succeeds, the error is not transient, or the
    /// retries are used up. Returns the outcome and the number of attempts.
    pub async fn run<T, F, Fut>(&self, node_id: &str, mut attempt: F) -> (Result<T, DelegateError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DelegateError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt(attempts).await {
                Ok(value) => return (Ok(value), attempts),
                Err(e) => {
                    let category = ErrorCategory::classify(&e.to_string());
                    if attempts > self.max_retries || !self.retries(category) {
                        return (Err(e), attempts);
                    }
                    let delay = self.delay_for(attempts);
                    log::warn!(
                        "Node {} attempt {} failed ({}): {}. Retrying in {:?}",
                        node_id,
                        attempts,
                        category,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::{ActionError, AgentExecutionError};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_from_config() {
        assert_eq!(RetryPolicy::from_config(&json!({})).unwrap(), None);
        let policy = RetryPolicy::from_config(&json!({"retry": {"maxRetries": 2}}))
            .unwrap()
            .unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert!(RetryPolicy::from_config(&json!({"retry": {"maxRetries": "x"}})).is_err());
        assert!(RetryPolicy::from_config(&json!({"retry": {"backoff": 0.5}})).is_err());
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            jitter: true,
            initial_delay_ms: 1_000,
            ..RetryPolicy::default()
        };
        let delay = policy.delay_for(1).as_millis();
        assert!((900..=1_100).contains(&delay));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (result, attempts) = quick(3)
            .run("flaky", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DelegateError::from(AgentExecutionError::new("connection reset")))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (result, attempts) = quick(2)
            .run("down", |_| async {
                Err::<(), _>(DelegateError::from(AgentExecutionError::new("timed out")))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_transient_errors_fail_fast() {
        let (result, attempts) = quick(5)
            .run("bad", |_| async {
                Err::<(), _>(DelegateError::from(ActionError::invalid_params(
                    "http",
                    "missing url",
                )))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
