//! Tool schema compatibility checking
//!
//! Diffs the catalogue's declared tool schemas against the backend's live
//! list when the connection comes up. Pure diagnostics: issues are logged and
//! never change dispatch behaviour. The rule is compatibility, not equality:
//! the local schema may relax descriptions, defaults and optional fields as
//! long as every backend-required field is present with a compatible type.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::backend::transport::{BackendTransport, JsonRpcResponse};
use crate::catalog::{Catalog, ToolDefinition};

pub struct CompatibilityChecker {
    catalog: Arc<Catalog>,
    transport: Arc<dyn BackendTransport>,
}

impl CompatibilityChecker {
    pub fn new(catalog: Arc<Catalog>, transport: Arc<dyn BackendTransport>) -> Self {
        Self { catalog, transport }
    }

    /// Run one sweep in the background. Never awaited by request paths.
    pub fn spawn_check(self: &Arc<Self>) {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            checker.check_backend_tools().await;
        });
    }

    pub async fn check_backend_tools(&self) {
        info!("checking tool definition compatibility");

        let result = match self.transport.send("tools/list", json!({})).await {
            Ok(JsonRpcResponse::Result(result)) => result,
            Ok(JsonRpcResponse::Error { code, message }) => {
                warn!(code, message = %message, "backend returned error when listing tools");
                return;
            }
            Err(err) => {
                warn!(error = %err, "skipping compatibility check, backend list unavailable");
                return;
            }
        };

        let backend_tools = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut incompatible = 0usize;
        for backend_tool in &backend_tools {
            let Some(name) = backend_tool.get("name").and_then(Value::as_str) else {
                continue;
            };
            match self.catalog.tool(name) {
                Some(local) => {
                    let issues = compare_tool_definitions(local, backend_tool);
                    if !issues.is_empty() {
                        incompatible += 1;
                        warn!(
                            tool = %name,
                            issues = %issues.join("; "),
                            "schema compatibility issue detected, update the catalogue"
                        );
                    }
                }
                None => {
                    warn!(
                        tool = %name,
                        "tool reported by backend is not declared in the catalogue"
                    );
                }
            }
        }

        if incompatible == 0 {
            info!(
                total = backend_tools.len(),
                "tool discovery completed, all declared tools compatible"
            );
        } else {
            warn!(
                total = backend_tools.len(),
                incompatible, "tool discovery completed with compatibility issues"
            );
        }
    }
}

/// Compare a locally declared tool against the backend's reported definition.
/// Returns human-readable issue strings; empty means compatible.
pub fn compare_tool_definitions(local: &ToolDefinition, backend: &Value) -> Vec<String> {
    let mut issues = Vec::new();

    let backend_name = backend.get("name").and_then(Value::as_str).unwrap_or("");
    if local.name != backend_name {
        issues.push(format!(
            "name mismatch: local='{}', backend='{}'",
            local.name, backend_name
        ));
        return issues;
    }

    let backend_schema = backend.get("inputSchema");
    let backend_required: Vec<&str> = backend_schema
        .and_then(|schema| schema.get("required"))
        .and_then(Value::as_array)
        .map(|fields| fields.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let local_properties = local.input_schema.get("properties");

    let missing: Vec<&str> = backend_required
        .iter()
        .copied()
        .filter(|field| {
            local_properties
                .and_then(|properties| properties.get(*field))
                .is_none()
        })
        .collect();
    if !missing.is_empty() {
        issues.push(format!(
            "missing required fields in local schema: {}",
            missing.join(", ")
        ));
    }

    let backend_properties = backend_schema.and_then(|schema| schema.get("properties"));
    for field in &backend_required {
        let local_type = local_properties
            .and_then(|properties| properties.get(*field))
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str);
        let backend_type = backend_properties
            .and_then(|properties| properties.get(*field))
            .and_then(|property| property.get("type"))
            .and_then(Value::as_str);

        if let (Some(local_type), Some(backend_type)) = (local_type, backend_type) {
            if !types_compatible(local_type, backend_type) {
                issues.push(format!(
                    "type mismatch for required field '{field}': local='{local_type}', backend='{backend_type}'"
                ));
            }
        }
    }

    issues
}

/// integer and number are interchangeable; every other primitive category
/// must match exactly.
fn types_compatible(left: &str, right: &str) -> bool {
    const NUMERIC: [&str; 2] = ["integer", "number"];
    left == right || (NUMERIC.contains(&left) && NUMERIC.contains(&right))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::transport::testing::{Scripted, ScriptedTransport};

    fn local_tool(name: &str, input_schema: Value) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "test tool".to_string(),
            input_schema,
            output_schema: None,
            read_only: Some(true),
        }
    }

    #[test]
    fn reports_missing_required_field() {
        let local = local_tool(
            "query_asset",
            json!({
                "type": "object",
                "properties": {"a": {"type": "string"}},
                "required": ["a"]
            }),
        );
        let backend = json!({
            "name": "query_asset",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "string"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }
        });

        let issues = compare_tool_definitions(&local, &backend);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("missing required fields"));
        assert!(issues[0].contains('b'));
    }

    #[test]
    fn integer_and_number_are_interchangeable() {
        let local = local_tool(
            "query_asset",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}},
                "required": ["a"]
            }),
        );
        let backend = json!({
            "name": "query_asset",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "number"}},
                "required": ["a"]
            }
        });

        assert!(compare_tool_definitions(&local, &backend).is_empty());
    }

    #[test]
    fn reports_type_mismatch_for_required_field() {
        let local = local_tool(
            "query_asset",
            json!({
                "type": "object",
                "properties": {"a": {"type": "string"}},
                "required": ["a"]
            }),
        );
        let backend = json!({
            "name": "query_asset",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "boolean"}},
                "required": ["a"]
            }
        });

        let issues = compare_tool_definitions(&local, &backend);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("type mismatch"));
        assert!(issues[0].contains("'a'"));
    }

    #[test]
    fn extra_optional_fields_and_descriptions_are_not_issues() {
        let local = local_tool(
            "query_asset",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "string", "description": "improved description"},
                    "extra": {"type": "string", "default": "x"}
                },
                "required": ["a"]
            }),
        );
        let backend = json!({
            "name": "query_asset",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "string", "description": "terse"}},
                "required": ["a"]
            }
        });

        assert!(compare_tool_definitions(&local, &backend).is_empty());
    }

    #[test]
    fn name_mismatch_short_circuits() {
        let local = local_tool("query_asset", json!({"type": "object"}));
        let backend = json!({"name": "other_tool", "inputSchema": {"type": "object"}});

        let issues = compare_tool_definitions(&local, &backend);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("name mismatch"));
    }

    #[tokio::test]
    async fn sweep_swallows_backend_failures() {
        let catalog = Arc::new(Catalog::load(None).expect("embedded catalogue"));
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_default("tools/list", Scripted::Refused);
        let checker = CompatibilityChecker::new(
            catalog,
            Arc::clone(&transport) as Arc<dyn BackendTransport>,
        );

        // Must not panic or error; diagnostics only.
        checker.check_backend_tools().await;
        assert_eq!(transport.calls_of("tools/list"), 1);
    }
}
