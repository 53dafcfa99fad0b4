//! The central Model Context Protocol engine
//!
//! Provides the primary MCP JSON-RPC decoding, method execution routing,
//! capabilities negotiation (`initialize`), and the mapping of each method to
//! the static catalogue or the backend dispatcher.

use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolRequestParams, CallToolResult, ContentBlock, GetPromptRequest,
    Implementation, InitializeRequest, InitializeResult, JsonrpcMessage, JsonrpcRequest,
    ListPromptsRequest, ListResourceTemplatesRequest, ListResourcesRequest, ListToolsRequest,
    PingRequest, ProtocolVersion, ReadResourceRequest, ReadResourceRequestParams,
    ServerCapabilities, ServerCapabilitiesPrompts, ServerCapabilitiesResources,
    ServerCapabilitiesTools, TextContent,
};
use serde_json::{json, Value};
use tracing::info;

use crate::dispatch::ResourceReadError;
use crate::errors::AppError;
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_error_with_data,
    json_rpc_result, request_id_to_value,
};
use crate::AppState;

pub const SUPPORTED_PROTOCOL_VERSION: &str = "2024-11-05";

pub async fn handle_json_rpc_value(state: &AppState, payload: Value) -> Option<Value> {
    if !payload.is_object() {
        return Some(json_rpc_error(None, -32600, "Invalid Request"));
    }

    let request_id = payload.get("id").cloned();
    let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return Some(json_rpc_error(request_id, -32600, "Invalid Request")),
    };

    match parsed {
        JsonrpcMessage::Request(request) => {
            if let Err(error_response) = validate_request_shape(&request) {
                return Some(error_response);
            }

            let request_id = request_id_to_value(request.id);
            if request.method.trim().is_empty() {
                return Some(json_rpc_error(Some(request_id), -32600, "Invalid Request"));
            }

            Some(
                handle_json_rpc_request(
                    state,
                    Some(request_id),
                    request.method,
                    request.params.map(Value::Object),
                )
                .await,
            )
        }
        JsonrpcMessage::Notification(notification) => {
            if notification.method.trim().is_empty() {
                return None;
            }

            let _ = handle_json_rpc_request(
                state,
                None,
                notification.method,
                notification.params.map(Value::Object),
            )
            .await;
            None
        }
        JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
            Some(json_rpc_error(request_id, -32600, "Invalid Request"))
        }
    }
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let payload = serde_json::to_value(request).expect("jsonrpc request serialization");
    let request_id = Some(request_id_to_value(request.id.clone()));

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "resources/read" => serde_json::from_value::<ReadResourceRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "resources/list" => serde_json::from_value::<ListResourcesRequest>(payload).is_ok(),
        "resources/templates/list" => {
            serde_json::from_value::<ListResourceTemplatesRequest>(payload).is_ok()
        }
        "prompts/list" => serde_json::from_value::<ListPromptsRequest>(payload).is_ok(),
        "prompts/get" => serde_json::from_value::<GetPromptRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        "initialize" => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(json_rpc_error(request_id, -32602, "Invalid params"))
    }
}

pub async fn handle_json_rpc_request(
    state: &AppState,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
) -> Value {
    let response = match method.as_str() {
        "initialize" => {
            let protocol_version = match negotiate_protocol_version(params.as_ref()) {
                Ok(version) => version,
                Err(err) => return app_error_to_json_rpc(id, err),
            };

            let initialize_result = InitializeResult {
                server_info: Implementation {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: None,
                    description: None,
                    icons: vec![],
                    website_url: None,
                },
                capabilities: ServerCapabilities {
                    tools: Some(ServerCapabilitiesTools {
                        list_changed: Some(false),
                    }),
                    resources: Some(ServerCapabilitiesResources {
                        subscribe: Some(false),
                        list_changed: Some(false),
                    }),
                    prompts: Some(ServerCapabilitiesPrompts {
                        list_changed: Some(false),
                    }),
                    ..Default::default()
                },
                protocol_version: protocol_version.into(),
                instructions: None,
                meta: None,
            };

            json_rpc_result(
                id,
                serde_json::to_value(initialize_result).expect("initialize result serialization"),
            )
        }
        "ping" => json_rpc_result(id, json!({})),
        "tools/list" => json_rpc_result(id, json!({ "tools": state.catalog.tools_listing() })),
        "tools/call" => handle_tools_call(state, id, params).await,
        "resources/list" => json_rpc_result(id, state.dispatcher.list_resources().await),
        "resources/templates/list" => {
            json_rpc_result(id, state.dispatcher.list_resource_templates().await)
        }
        "resources/read" => handle_resources_read(state, id, params).await,
        "prompts/list" => {
            json_rpc_result(id, json!({ "prompts": state.catalog.prompts_listing() }))
        }
        "prompts/get" => handle_prompts_get(state, id, params),
        _ => json_rpc_error(id, -32601, "Method not found"),
    };

    info!(
        method = %method,
        outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
        "mcp action handled"
    );

    response
}

async fn handle_tools_call(state: &AppState, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    let verdict = state
        .dispatcher
        .call_tool(&tool_call.name, tool_call.arguments.unwrap_or_default())
        .await;

    // Structured errors are already in CallToolResult shape.
    if verdict
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return json_rpc_result(id, verdict);
    }

    let result = CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(
            verdict.to_string(),
            None,
            None,
        ))],
        is_error: None,
        meta: None,
        structured_content: verdict.as_object().cloned(),
    };

    json_rpc_result(
        id,
        serde_json::to_value(result).expect("tool call result serialization"),
    )
}

async fn handle_resources_read(
    state: &AppState,
    id: Option<Value>,
    params: Option<Value>,
) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let resource_read: ReadResourceRequestParams = match serde_json::from_value(raw_params) {
        Ok(value) => value,
        Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
    };

    match state.dispatcher.read_resource(&resource_read.uri).await {
        Ok(result) => json_rpc_result(id, result),
        Err(ResourceReadError::Offline) => json_rpc_error_with_data(
            id,
            -32000,
            "Backend unavailable",
            Some(json!({
                "code": "backend_unavailable",
                "message": "backend is offline and resource content is not cached",
                "details": {
                    "uri": resource_read.uri,
                },
            })),
        ),
        Err(ResourceReadError::Backend { code, message }) => {
            json_rpc_error(id, code as i32, &message)
        }
        Err(ResourceReadError::Transport(err)) => json_rpc_error_with_data(
            id,
            -32603,
            "Internal error",
            Some(json!({
                "code": "backend_unreachable",
                "message": err.to_string(),
                "details": {},
            })),
        ),
    }
}

fn handle_prompts_get(state: &AppState, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(raw_params) = params else {
        return json_rpc_error(id, -32602, "Invalid params");
    };

    let Some(name) = raw_params.get("name").and_then(Value::as_str) else {
        return json_rpc_error(id, -32602, "Invalid params");
    };
    let arguments = raw_params
        .get("arguments")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let Some(prompt) = state.catalog.prompt(name) else {
        return json_rpc_error_with_data(
            id,
            -32602,
            "Invalid params",
            Some(json!({
                "code": "prompt_not_found",
                "message": "unknown prompt name",
                "details": {
                    "name": name,
                },
            })),
        );
    };

    match prompt.render(&arguments) {
        Ok(text) => json_rpc_result(
            id,
            json!({
                "description": prompt.description,
                "messages": [{
                    "role": "user",
                    "content": { "type": "text", "text": text },
                }],
            }),
        ),
        Err(err) => app_error_to_json_rpc(id, err),
    }
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<ProtocolVersion, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    if offered_version != SUPPORTED_PROTOCOL_VERSION {
        return Err(AppError::bad_request(
            "unsupported_protocol_version",
            "unsupported initialize protocolVersion",
        ));
    }

    Ok(ProtocolVersion::V2024_11_05)
}
