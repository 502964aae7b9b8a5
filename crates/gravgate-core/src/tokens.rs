use gravgate_protocol::claude::request::MessagesRequest;
use gravgate_protocol::claude::types::{ContentBlock, MessageContent as ClaudeContent};
use gravgate_protocol::openai::types::{ChatMessage, ToolDefinition};

/// Character-heuristic token estimator. Real tokenizer counts are an
/// upstream concern; the gateway only needs stable, monotonic numbers for
/// accounting and rate decisions.
pub fn count_text(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

pub fn count_openai_messages(messages: &[ChatMessage]) -> u32 {
    let mut text = String::new();
    for message in messages {
        match message {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Tool { content, .. } => text.push_str(&content.text()),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                if let Some(content) = content {
                    text.push_str(&content.text());
                }
                for call in tool_calls.as_deref().unwrap_or_default() {
                    text.push_str(&call.function.name);
                    text.push_str(&call.function.arguments);
                }
            }
        }
    }
    count_text(&text)
}

pub fn count_claude_request(request: &MessagesRequest) -> u32 {
    let mut text = String::new();
    if let Some(system) = &request.system {
        text.push_str(&system.text());
    }
    for message in &request.messages {
        match &message.content {
            ClaudeContent::Text(value) => text.push_str(value),
            ClaudeContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: value } => text.push_str(value),
                        ContentBlock::ToolUse { name, input, .. } => {
                            text.push_str(name);
                            text.push_str(&input.to_string());
                        }
                        ContentBlock::ToolResult { content, .. } => {
                            if let Some(content) = content {
                                text.push_str(&serde_json::to_string(content).unwrap_or_default());
                            }
                        }
                        ContentBlock::Image { .. } => {}
                    }
                }
            }
        }
    }
    count_text(&text)
}

/// Tool schemas count against the prompt as their serialized JSON size.
pub fn count_openai_tool_schemas(tools: Option<&[ToolDefinition]>) -> u32 {
    let Some(tools) = tools else { return 0 };
    let bytes = serde_json::to_vec(tools).map(|body| body.len()).unwrap_or(0);
    (bytes as u32).div_ceil(4)
}

pub fn count_claude_tool_schemas(
    tools: Option<&[gravgate_protocol::claude::types::ToolSpec]>,
) -> u32 {
    let Some(tools) = tools else { return 0 };
    let bytes = serde_json::to_vec(tools).map(|body| body.len()).unwrap_or(0);
    (bytes as u32).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_chars_per_token_rounded_up() {
        assert_eq!(count_text(""), 0);
        assert_eq!(count_text("abcd"), 1);
        assert_eq!(count_text("abcde"), 2);
    }

    #[test]
    fn assistant_tool_calls_count_toward_the_prompt() {
        let with_calls = count_openai_messages(&[ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![gravgate_protocol::openai::types::ToolCall {
                id: "t1".to_string(),
                kind: gravgate_protocol::openai::types::ToolCallKind::Function,
                function: gravgate_protocol::openai::types::FunctionCallPayload {
                    name: "lookup".to_string(),
                    arguments: r#"{"q":"xxxxxxxx"}"#.to_string(),
                },
            }]),
        }]);
        let without = count_openai_messages(&[ChatMessage::Assistant {
            content: None,
            tool_calls: None,
        }]);
        assert!(with_calls > without);
    }

    #[test]
    fn schema_bytes_count_when_tools_are_present() {
        assert_eq!(count_openai_tool_schemas(None), 0);
        let tools = vec![ToolDefinition {
            kind: "function".to_string(),
            function: Some(gravgate_protocol::openai::types::FunctionObject {
                name: "lookup".to_string(),
                description: Some("find things".to_string()),
                parameters: None,
            }),
        }];
        assert!(count_openai_tool_schemas(Some(&tools)) > 0);
    }
}
