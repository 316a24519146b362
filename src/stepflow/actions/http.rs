// SPDX-License-Identifier: MIT

use crate::adk::action::ActionHandler;
use crate::adk::error::ActionError;
use crate::stepflow::workflow::state::ExecutionState;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

// --- Static schema ---

static HTTP_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "url": {
                "type": "string",
                "description": "Absolute http(s) URL"
            },
            "method": {
                "type": "string",
                "description": "HTTP method (default GET)"
            },
            "headers": {
                "type": "object",
                "additionalProperties": { "type": "string" }
            },
            "query": {
                "type": "object",
                "description": "Query parameters appended to the URL"
            },
            "body": {
                "description": "JSON request body"
            },
            "timeoutMs": {
                "type": "integer",
                "description": "Request timeout in milliseconds"
            },
            "failOnStatus": {
                "type": "boolean",
                "description": "Fail the node on a non-2xx status (default true)"
            }
        },
        "required": ["url"]
    })
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpParams {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default = "default_fail_on_status")]
    fail_on_status: bool,
}

fn default_fail_on_status() -> bool {
    true
}

/// Performs an HTTP request and returns `{ status, headers, body }`
pub struct HttpAction {
    client: Client,
    default_timeout: Duration,
}

impl HttpAction {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            default_timeout,
        }
    }

    fn parse_params(params: &Value) -> Result<(HttpParams, Method, Url), ActionError> {
        let params: HttpParams = serde_json::from_value(params.clone())
            .map_err(|e| ActionError::invalid_params("http", e.to_string()))?;

        let method = params.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ActionError::invalid_params("http", format!("bad method '{}'", method)))?;

        let mut url = Url::parse(&params.url)
            .map_err(|e| ActionError::invalid_params("http", format!("bad url '{}': {}", params.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ActionError::invalid_params(
                "http",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if !params.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params.query {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                pairs.append_pair(key, &value);
            }
        }

        Ok((params, method, url))
    }
}

#[async_trait]
impl ActionHandler for HttpAction {
    fn name(&self) -> &str {
        "http"
    }

    fn description(&self) -> &str {
        "Sends an HTTP request. JSON responses are parsed, anything else is returned as text."
    }

    fn schema(&self) -> &Value {
        &HTTP_SCHEMA
    }

    async fn perform(
        &self,
        action_type: &str,
        params: &Value,
        _state: &ExecutionState,
    ) -> Result<Value, ActionError> {
        let (params, method, url) = Self::parse_params(params)?;
        let timeout = params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        log::info!("{} {} {}", action_type, method, url);

        let mut request = self.client.request(method, url.clone()).timeout(timeout);
        for (name, value) in &params.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &params.body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ActionError::failed(action_type, e.to_string()))?;

        let status = resp.status();
        let headers: Map<String, Value> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), json!(v.to_str().ok()?))))
            .collect();
        let text = resp
            .text()
            .await
            .map_err(|e| ActionError::failed(action_type, e.to_string()))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if params.fail_on_status && !status.is_success() {
            return Err(ActionError::failed(
                action_type,
                format!("{} returned HTTP {}: {}", url, status.as_u16(), body),
            ));
        }

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}
