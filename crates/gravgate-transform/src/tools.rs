use serde_json::Value as JsonValue;

use gravgate_common::GatewayError;
use gravgate_protocol::claude::types::ToolSpec;
use gravgate_protocol::openai::types::ToolDefinition;
use gravgate_protocol::upstream::types::{FunctionDeclaration, Tool};

pub const MAX_TOOLS: usize = 32;
pub const MAX_TOOL_SCHEMA_BYTES: usize = 50 * 1024;

/// Keys removed from parameter schemas before they go upstream.
const STRIPPED_KEYS: [&str; 3] = ["$schema", "__proto__", "prototype"];

pub fn from_openai(tools: &[ToolDefinition]) -> Result<Option<Vec<Tool>>, GatewayError> {
    let mut declarations = Vec::with_capacity(tools.len());
    for tool in tools {
        if tool.kind != "function" {
            return Err(GatewayError::ToolSchemaInvalid(format!(
                "unsupported tool type: {}",
                tool.kind
            )));
        }
        let Some(function) = &tool.function else {
            return Err(GatewayError::ToolSchemaInvalid(
                "function tool without a function object".to_string(),
            ));
        };
        declarations.push(declaration(
            &function.name,
            function.description.as_deref(),
            function.parameters.clone(),
        )?);
    }
    finish(declarations)
}

pub fn from_claude(tools: &[ToolSpec]) -> Result<Option<Vec<Tool>>, GatewayError> {
    let mut declarations = Vec::with_capacity(tools.len());
    for tool in tools {
        declarations.push(declaration(
            &tool.name,
            tool.description.as_deref(),
            tool.input_schema.clone(),
        )?);
    }
    finish(declarations)
}

fn declaration(
    name: &str,
    description: Option<&str>,
    parameters: Option<JsonValue>,
) -> Result<FunctionDeclaration, GatewayError> {
    if name.trim().is_empty() {
        return Err(GatewayError::ToolSchemaInvalid(
            "tool name must not be empty".to_string(),
        ));
    }
    let parameters = match parameters {
        Some(mut schema) => {
            sanitize_schema(&mut schema);
            let size = serde_json::to_vec(&schema)
                .map(|bytes| bytes.len())
                .unwrap_or(0);
            if size > MAX_TOOL_SCHEMA_BYTES {
                return Err(GatewayError::ToolSchemaInvalid(format!(
                    "parameters for tool {name} exceed {MAX_TOOL_SCHEMA_BYTES} bytes"
                )));
            }
            Some(schema)
        }
        None => None,
    };
    Ok(FunctionDeclaration {
        name: name.to_string(),
        description: description.unwrap_or_default().to_string(),
        parameters,
    })
}

fn finish(declarations: Vec<FunctionDeclaration>) -> Result<Option<Vec<Tool>>, GatewayError> {
    if declarations.is_empty() {
        return Ok(None);
    }
    if declarations.len() > MAX_TOOLS {
        return Err(GatewayError::ToolSchemaInvalid(format!(
            "too many tools: {} (limit {MAX_TOOLS})",
            declarations.len()
        )));
    }
    Ok(Some(vec![Tool {
        function_declarations: declarations,
    }]))
}

fn sanitize_schema(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            for key in STRIPPED_KEYS {
                map.remove(key);
            }
            for entry in map.values_mut() {
                sanitize_schema(entry);
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                sanitize_schema(item);
            }
        }
        _ => {}
    }
}
