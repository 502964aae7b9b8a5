use uuid::Uuid;

use gravgate_protocol::upstream::request::{Envelope, GenerateRequest};
use gravgate_protocol::upstream::types::{
    Content, ContentRole, FunctionCallingConfig, GenerationConfig, Part, Tool, ToolConfig,
};

const FUNCTION_CALLING_MODE: &str = "VALIDATED";

#[derive(Debug, Clone)]
pub struct EnvelopeParts {
    pub wire_model: String,
    pub project_id: String,
    pub session_id: String,
    pub user_agent: String,
    /// The gateway-configured system instruction.
    pub config_instruction: String,
    /// Anthropic system text, appended after the configured instruction.
    pub system_text: Option<String>,
    pub contents: Vec<Content>,
    pub tools: Option<Vec<Tool>>,
    pub generation_config: GenerationConfig,
}

pub fn build(parts: EnvelopeParts) -> Envelope {
    let mut instruction = parts.config_instruction;
    if let Some(system_text) = parts.system_text
        && !system_text.is_empty()
    {
        if !instruction.is_empty() {
            instruction.push('\n');
        }
        instruction.push_str(&system_text);
    }

    Envelope {
        model: parts.wire_model,
        project: parts.project_id,
        request_id: format!("agent-{}", Uuid::new_v4()),
        request: GenerateRequest {
            contents: parts.contents,
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(instruction),
                    ..Default::default()
                }],
                role: Some(ContentRole::User),
            },
            tools: parts.tools,
            tool_config: ToolConfig {
                function_calling_config: FunctionCallingConfig {
                    mode: FUNCTION_CALLING_MODE.to_string(),
                },
            },
            generation_config: parts.generation_config,
            session_id: parts.session_id,
        },
        user_agent: parts.user_agent,
    }
}
