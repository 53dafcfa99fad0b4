//! Static tool, prompt and resource catalogue
//!
//! The catalogue is the stable surface the proxy advertises to clients even
//! when the backend is unreachable. It is loaded once at startup, either from
//! the embedded default or from an operator-supplied JSON file, and is
//! read-only for the process lifetime.

use std::{collections::BTreeMap, fs, path::Path};

use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::errors::AppError;

const EMBEDDED_CATALOG: &str = include_str!("../definitions/catalog.json");

/// A locally declared tool. `read_only` marks the tool as safe to retry;
/// a tool without the classification is never retried.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub read_only: Option<bool>,
}

impl ToolDefinition {
    /// The shape served by `tools/list`. The retry classification is proxy
    /// metadata and is not advertised to clients.
    pub fn listing(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("name".to_string(), json!(self.name));
        entry.insert("description".to_string(), json!(self.description));
        entry.insert("inputSchema".to_string(), self.input_schema.clone());
        if let Some(output_schema) = &self.output_schema {
            entry.insert("outputSchema".to_string(), output_schema.clone());
        }
        Value::Object(entry)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt is a text template; rendering substitutes `{argument}`
/// placeholders and needs no backend connection.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    pub template: String,
}

impl PromptDefinition {
    pub fn listing(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "arguments": self.arguments.iter().map(|argument| {
                json!({
                    "name": argument.name,
                    "description": argument.description,
                    "required": argument.required,
                })
            }).collect::<Vec<_>>(),
        })
    }

    pub fn render(&self, arguments: &Map<String, Value>) -> Result<String, AppError> {
        let mut text = self.template.clone();
        for argument in &self.arguments {
            let value = match arguments.get(&argument.name) {
                Some(Value::String(value)) => value.clone(),
                Some(value) => value.to_string(),
                None if argument.required => {
                    return Err(AppError::bad_request(
                        "missing_prompt_argument",
                        format!("prompt argument '{}' is required", argument.name),
                    ));
                }
                None => String::new(),
            };
            text = text.replace(&format!("{{{}}}", argument.name), &value);
        }
        Ok(text)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    prompts: Vec<PromptDefinition>,
    #[serde(default)]
    resources: Vec<Value>,
    #[serde(default)]
    resource_templates: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalogue file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalogue: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalogue entry has an empty name")]
    EmptyName,
    #[error("duplicate tool definition: {0}")]
    DuplicateTool(String),
    #[error("duplicate prompt definition: {0}")]
    DuplicatePrompt(String),
}

#[derive(Debug)]
pub struct Catalog {
    tools: BTreeMap<String, ToolDefinition>,
    prompts: BTreeMap<String, PromptDefinition>,
    resources: Vec<Value>,
    resource_templates: Vec<Value>,
}

impl Catalog {
    /// Load the catalogue from `path` when given, otherwise the embedded
    /// default.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::from_json(&fs::read_to_string(path)?),
            None => Self::from_json(EMBEDDED_CATALOG),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(raw)?;

        let mut tools = BTreeMap::new();
        for tool in file.tools {
            if tool.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            let name = tool.name.clone();
            if tools.insert(name.clone(), tool).is_some() {
                return Err(CatalogError::DuplicateTool(name));
            }
        }

        let mut prompts = BTreeMap::new();
        for prompt in file.prompts {
            if prompt.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            let name = prompt.name.clone();
            if prompts.insert(name.clone(), prompt).is_some() {
                return Err(CatalogError::DuplicatePrompt(name));
            }
        }

        Ok(Self {
            tools,
            prompts,
            resources: file.resources,
            resource_templates: file.resource_templates,
        })
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn tools_listing(&self) -> Vec<Value> {
        self.tools.values().map(ToolDefinition::listing).collect()
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptDefinition> {
        self.prompts.get(name)
    }

    pub fn prompts_listing(&self) -> Vec<Value> {
        self.prompts.values().map(PromptDefinition::listing).collect()
    }

    pub fn resources_listing(&self) -> Vec<Value> {
        self.resources.clone()
    }

    pub fn resource_templates_listing(&self) -> Vec<Value> {
        self.resource_templates.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn embedded_catalogue_parses() {
        let catalog = Catalog::load(None).expect("embedded catalogue should parse");

        assert!(catalog.tool("get_project_config").is_some());
        assert!(catalog.tool("execute_console_command").is_some());
        assert!(catalog.prompt("analyze_asset").is_some());
        assert!(!catalog.resource_templates_listing().is_empty());
    }

    #[test]
    fn read_only_classification_is_optional() {
        let catalog = Catalog::load(None).expect("embedded catalogue should parse");

        let query = catalog.tool("query_asset").expect("declared tool");
        assert_eq!(query.read_only, Some(true));

        let console = catalog.tool("execute_console_command").expect("declared tool");
        assert_eq!(console.read_only, Some(false));

        let import = catalog.tool("import_asset").expect("declared tool");
        assert_eq!(import.read_only, None);
    }

    #[test]
    fn listing_omits_retry_classification() {
        let catalog = Catalog::load(None).expect("embedded catalogue should parse");
        for entry in catalog.tools_listing() {
            assert!(entry.get("readOnly").is_none());
            assert!(entry.get("name").is_some());
            assert!(entry.get("inputSchema").is_some());
        }
    }

    #[test]
    fn rejects_duplicate_tool_names() {
        let raw = json!({
            "tools": [
                {"name": "a", "description": "first", "inputSchema": {"type": "object"}},
                {"name": "a", "description": "second", "inputSchema": {"type": "object"}}
            ]
        })
        .to_string();

        let err = Catalog::from_json(&raw).expect_err("expected duplicate error");
        assert!(matches!(err, CatalogError::DuplicateTool(_)));
    }

    #[test]
    fn prompt_render_substitutes_arguments() {
        let catalog = Catalog::load(None).expect("embedded catalogue should parse");
        let prompt = catalog.prompt("analyze_asset").expect("declared prompt");

        let mut arguments = Map::new();
        arguments.insert(
            "asset_path".to_string(),
            json!("/Game/Blueprints/BP_Player"),
        );
        arguments.insert("focus_areas".to_string(), json!("dependencies"));

        let text = prompt.render(&arguments).expect("render should succeed");
        assert!(text.contains("/Game/Blueprints/BP_Player"));
        assert!(text.contains("dependencies"));
        assert!(!text.contains("{asset_path}"));
    }

    #[test]
    fn prompt_render_rejects_missing_required_argument() {
        let catalog = Catalog::load(None).expect("embedded catalogue should parse");
        let prompt = catalog.prompt("analyze_asset").expect("declared prompt");

        let err = prompt
            .render(&Map::new())
            .expect_err("expected missing argument error");
        assert!(err.to_string().contains("asset_path"));
    }
}
