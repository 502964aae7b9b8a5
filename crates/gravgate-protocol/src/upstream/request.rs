use serde::{Deserialize, Serialize};

use super::types::{Content, GenerationConfig, Tool, ToolConfig};

/// Outer envelope posted to the upstream streaming endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub model: String,
    pub project: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub request: GenerateRequest,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(rename = "toolConfig")]
    pub tool_config: ToolConfig,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}
