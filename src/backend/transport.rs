//! JSON-RPC 2.0 transport to the backend over HTTP
//!
//! Builds the request envelope, posts it to the backend's fixed `/mcp` path
//! and classifies failures into the transport error taxonomy. The transport
//! never touches connection state; callers report outcomes to the health
//! monitor.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::errors::TransportError;

pub const JSON_RPC_VERSION: &str = "2.0";
pub const BACKEND_BASE_PATH: &str = "/mcp";

/// Immutable description of the single backend this proxy forwards to.
#[derive(Debug, Clone)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub probe_interval: Duration,
}

impl BackendEndpoint {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, BACKEND_BASE_PATH)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// One backend reply: either the `result` payload or the backend's JSON-RPC
/// error object. An error object means the backend is reachable.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcResponse {
    Result(Value),
    Error { code: i64, message: String },
}

fn decode_envelope(method: &str, body: Value) -> Result<JsonRpcResponse, TransportError> {
    let envelope: JsonRpcEnvelope =
        serde_json::from_value(body).map_err(|err| TransportError::MalformedResponse {
            reason: format!("invalid json-rpc envelope: {err}"),
        })?;

    if let Some(error) = envelope.error {
        error!(
            method = %method,
            code = error.code,
            message = %error.message,
            "backend returned json-rpc error"
        );
        return Ok(JsonRpcResponse::Error {
            code: error.code,
            message: error.message,
        });
    }

    match envelope.result {
        Some(result) => Ok(JsonRpcResponse::Result(result)),
        None => Err(TransportError::MalformedResponse {
            reason: "response carries neither result nor error".to_string(),
        }),
    }
}

#[async_trait]
pub trait BackendTransport: Send + Sync {
    /// Send one JSON-RPC request with the endpoint's configured timeout.
    async fn send(&self, method: &str, params: Value) -> Result<JsonRpcResponse, TransportError>;

    /// Send one JSON-RPC request with an explicit timeout override.
    async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, TransportError>;
}

/// The production transport: one shared `reqwest::Client` (and its connection
/// pool) used by forwarded calls and health probes alike.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    next_request_id: AtomicI64,
}

impl HttpTransport {
    pub fn new(endpoint: &BackendEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: endpoint.base_url(),
            timeout: endpoint.timeout,
            next_request_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn classify_send_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::ConnectTimeout {
            message: err.to_string(),
        }
    } else if err.is_connect() {
        TransportError::ConnectRefused {
            message: err.to_string(),
        }
    } else {
        TransportError::MalformedResponse {
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn send(&self, method: &str, params: Value) -> Result<JsonRpcResponse, TransportError> {
        self.send_with_timeout(method, params, self.timeout).await
    }

    async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, TransportError> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        debug!(method = %method, id = request.id, "calling backend method");

        let response = self
            .client
            .post(&self.base_url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| classify_send_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::MalformedResponse {
                reason: format!("unexpected http status {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::ConnectTimeout {
                    message: err.to_string(),
                }
            } else {
                TransportError::MalformedResponse {
                    reason: format!("invalid json body: {err}"),
                }
            }
        })?;

        decode_envelope(method, body)
    }
}
