//! Tool call dispatch and backend forwarding
//!
//! The dispatcher is the single entry point for tool invocations. It owns the
//! short-circuit checks (unknown tool, backend offline), forwards live calls
//! through the retry policy, and normalizes every failure mode into one
//! structured error shape; nothing escapes this boundary as an error value.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::backend::health::{ConnectionState, HealthMonitor};
use crate::backend::retry::RetryPolicy;
use crate::backend::transport::{BackendTransport, JsonRpcResponse};
use crate::catalog::Catalog;
use crate::errors::TransportError;

/// The uniform structured error payload returned across the tool boundary:
/// `{isError: true, content: [{type: "text", text: <json {error, code?}>}]}`.
pub fn error_response(message: &str, code: Option<&str>) -> Value {
    let mut error_data = Map::new();
    error_data.insert("error".to_string(), json!(message));
    if let Some(code) = code {
        error_data.insert("code".to_string(), json!(code));
    }
    json!({
        "isError": true,
        "content": [{
            "type": "text",
            "text": Value::Object(error_data).to_string(),
        }],
    })
}

/// Failure modes of a forwarded `resources/read`, mapped to JSON-RPC errors
/// by the serving layer.
#[derive(Debug)]
pub enum ResourceReadError {
    Offline,
    Backend { code: i64, message: String },
    Transport(TransportError),
}

pub struct Dispatcher {
    catalog: Arc<Catalog>,
    transport: Arc<dyn BackendTransport>,
    health: Arc<HealthMonitor>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<Catalog>,
        transport: Arc<dyn BackendTransport>,
        health: Arc<HealthMonitor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            transport,
            health,
            retry,
        }
    }

    /// Invoke a tool on the backend. Always returns a result payload; every
    /// failure mode is converted to the structured error shape.
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Value {
        info!(tool = %name, "tool call requested");

        // Deferred start is a no-op once the monitor is running.
        self.health.start().await;

        let Some(definition) = self.catalog.tool(name) else {
            warn!(tool = %name, "tool not found in catalogue");
            return error_response(&format!("Tool '{name}' not found"), None);
        };

        if self.health.state() == ConnectionState::Offline {
            warn!(tool = %name, "backend unavailable for tool call");
            return error_response(
                "Backend unavailable. Ensure the editor backend is running and reachable.",
                None,
            );
        }

        let read_only = match definition.read_only {
            Some(flag) => flag,
            None => {
                warn!(
                    tool = %name,
                    "tool has no readOnly classification, treating as a write operation"
                );
                false
            }
        };

        let params = json!({ "name": name, "arguments": Value::Object(arguments) });
        let transport = Arc::clone(&self.transport);
        let outcome = self
            .retry
            .run(read_only, move || {
                let transport = Arc::clone(&transport);
                let params = params.clone();
                async move { transport.send("tools/call", params).await }
            })
            .await;
        self.health.observe(&outcome);

        match outcome {
            Ok(JsonRpcResponse::Result(result)) => {
                info!(tool = %name, "tool call succeeded");
                unwrap_tool_result(result)
            }
            Ok(JsonRpcResponse::Error { code, message }) => {
                error!(tool = %name, code, message = %message, "backend returned error for tool call");
                error_response(&message, Some(&code.to_string()))
            }
            Err(TransportError::ConnectTimeout { message }) => {
                warn!(tool = %name, "tool call timed out");
                error_response(
                    &format!("Request to backend timed out: {message}"),
                    Some("timeout_error"),
                )
            }
            Err(TransportError::ConnectRefused { message }) => {
                error!(tool = %name, message = %message, "connection to backend failed");
                error_response(
                    &format!("Failed to connect to backend: {message}"),
                    Some("connection_error"),
                )
            }
            Err(err) => {
                error!(tool = %name, error = %err, "tool call failed");
                error_response(&format!("Failed to call tool: {err}"), Some("internal_error"))
            }
        }
    }

    /// Forward `resources/list`, falling back to the catalogue's static
    /// metadata when the backend cannot answer. Content is never cached, only
    /// metadata.
    pub async fn list_resources(&self) -> Value {
        match self.forward_when_online("resources/list", json!({})).await {
            Some(result) => result,
            None => json!({
                "resources": self.catalog.resources_listing(),
                "nextCursor": "",
            }),
        }
    }

    pub async fn list_resource_templates(&self) -> Value {
        match self
            .forward_when_online("resources/templates/list", json!({}))
            .await
        {
            Some(result) => result,
            None => json!({
                "resourceTemplates": self.catalog.resource_templates_listing(),
                "nextCursor": "",
            }),
        }
    }

    /// Read a resource through the backend. Resource content has no offline
    /// fallback.
    pub async fn read_resource(&self, uri: &str) -> Result<Value, ResourceReadError> {
        self.health.start().await;

        if self.health.state() == ConnectionState::Offline {
            warn!(uri = %uri, "backend unavailable for resource read");
            return Err(ResourceReadError::Offline);
        }

        let outcome = self
            .transport
            .send("resources/read", json!({ "uri": uri }))
            .await;
        self.health.observe(&outcome);

        match outcome {
            Ok(JsonRpcResponse::Result(result)) => Ok(result),
            Ok(JsonRpcResponse::Error { code, message }) => {
                error!(uri = %uri, code, message = %message, "backend returned error for resource read");
                Err(ResourceReadError::Backend { code, message })
            }
            Err(err) => {
                error!(uri = %uri, error = %err, "resource read failed");
                Err(ResourceReadError::Transport(err))
            }
        }
    }

    async fn forward_when_online(&self, method: &str, params: Value) -> Option<Value> {
        if self.health.state() != ConnectionState::Online {
            return None;
        }

        let outcome = self.transport.send(method, params).await;
        self.health.observe(&outcome);

        match outcome {
            Ok(JsonRpcResponse::Result(result)) => Some(result),
            Ok(JsonRpcResponse::Error { code, message }) => {
                warn!(method = %method, code, message = %message, "backend returned error, using catalogue metadata");
                None
            }
            Err(err) => {
                warn!(method = %method, error = %err, "backend list failed, using catalogue metadata");
                None
            }
        }
    }
}

/// Unwrap a transport-successful `tools/call` result. The backend reports
/// failures on two layers: an `isError` result, and a `bSuccess: false` flag
/// embedded in an otherwise-successful text payload. Both are converted to
/// the structured error shape.
fn unwrap_tool_result(result: Value) -> Value {
    if result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let text = first_text_block(&result).unwrap_or_else(|| "{}".to_string());
        return match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => {
                let message = parsed
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string();
                let code = parsed.get("code").map(|code| match code {
                    Value::String(code) => code.clone(),
                    other => other.to_string(),
                });
                error_response(&message, code.as_deref())
            }
            Err(_) => error_response(&text, None),
        };
    }

    let Some(text) = first_text_block(&result) else {
        return result;
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) => {
            if parsed.is_object() && parsed.get("bSuccess") == Some(&Value::Bool(false)) {
                let message = parsed
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("Operation failed");
                return error_response(message, None);
            }
            parsed
        }
        Err(_) => json!({ "text": text }),
    }
}

fn first_text_block(result: &Value) -> Option<String> {
    let first = result.get("content")?.as_array()?.first()?;
    if first.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    Some(
        first
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    )
}
