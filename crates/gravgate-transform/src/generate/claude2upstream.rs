use serde_json::json;

use gravgate_protocol::claude::request::MessagesRequest;
use gravgate_protocol::claude::types::{
    ContentBlock, MessageContent, MessageRole, ToolResultContent,
};
use gravgate_protocol::upstream::types::{
    Blob, Content, ContentRole, FunctionCall, FunctionResponse, Part,
};

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Result of converting an Anthropic request: the upstream contents plus the
/// system text lifted out for the envelope's system instruction.
#[derive(Debug, Clone)]
pub struct ConvertedRequest {
    pub contents: Vec<Content>,
    pub system_text: Option<String>,
}

pub fn convert_request(request: &MessagesRequest) -> ConvertedRequest {
    let system_text = request
        .system
        .as_ref()
        .map(|system| system.text())
        .filter(|text| !text.is_empty());

    let mut contents: Vec<Content> = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let (role, parts) = match message.role {
            MessageRole::User => (
                ContentRole::User,
                map_user_content(&message.content, &contents),
            ),
            MessageRole::Assistant => {
                (ContentRole::Model, map_assistant_content(&message.content))
            }
        };
        if !parts.is_empty() {
            contents.push(Content {
                parts,
                role: Some(role),
            });
        }
    }

    ConvertedRequest {
        contents,
        system_text,
    }
}

fn map_assistant_content(content: &MessageContent) -> Vec<Part> {
    let blocks = match content {
        MessageContent::Text(text) => return text_parts(text),
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.extend(text_parts(text)),
            ContentBlock::ToolUse { id, name, input } => {
                parts.push(Part {
                    function_call: Some(FunctionCall {
                        id: Some(id.clone()),
                        name: name.clone(),
                        // The raw input value is preserved byte-for-byte
                        // under `query`.
                        args: Some(json!({ "query": input })),
                    }),
                    ..Default::default()
                });
            }
            ContentBlock::Image { source } => parts.push(image_part(source)),
            ContentBlock::ToolResult { .. } => {}
        }
    }
    parts
}

fn map_user_content(content: &MessageContent, prior: &[Content]) -> Vec<Part> {
    let blocks = match content {
        MessageContent::Text(text) => return text_parts(text),
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.extend(text_parts(text)),
            ContentBlock::Image { source } => parts.push(image_part(source)),
            ContentBlock::ToolResult {
                tool_use_id,
                id,
                content,
                is_error: _,
            } => {
                let call_id = tool_use_id.clone().or_else(|| id.clone());
                let name = call_id
                    .as_deref()
                    .and_then(|call_id| resolve_call_name(prior, call_id))
                    .or_else(|| call_id.clone())
                    .unwrap_or_default();
                let output = content.as_ref().map(textify).unwrap_or_default();
                parts.push(Part {
                    function_response: Some(FunctionResponse {
                        id: call_id,
                        name,
                        response: json!({ "output": output }),
                    }),
                    ..Default::default()
                });
            }
            ContentBlock::ToolUse { .. } => {}
        }
    }
    parts
}

/// Walk backward to find the call a tool result answers.
fn resolve_call_name(contents: &[Content], call_id: &str) -> Option<String> {
    for content in contents.iter().rev() {
        for part in &content.parts {
            if let Some(call) = &part.function_call
                && call.id.as_deref() == Some(call_id)
            {
                return Some(call.name.clone());
            }
        }
    }
    None
}

fn text_parts(text: &str) -> Vec<Part> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![Part {
            text: Some(text.to_string()),
            ..Default::default()
        }]
    }
}

fn image_part(source: &gravgate_protocol::claude::types::ImageSource) -> Part {
    Part {
        inline_data: Some(Blob {
            mime_type: source
                .media_type
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
            data: source.data.clone(),
        }),
        ..Default::default()
    }
}

fn textify(content: &ToolResultContent) -> String {
    match content {
        ToolResultContent::Text(text) => text.clone(),
        ToolResultContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravgate_protocol::claude::types::{ImageSource, Message, SystemPrompt};
    use serde_json::json;

    fn request(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: Some("gemini-2.5-pro".to_string()),
            messages,
            system: Some(SystemPrompt::Text("stay factual".to_string())),
            stream: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
        }
    }

    #[test]
    fn system_text_is_lifted_not_duplicated() {
        let converted = convert_request(&request(vec![Message {
            role: MessageRole::User,
            content: MessageContent::Text("hi".to_string()),
        }]));
        assert_eq!(converted.system_text.as_deref(), Some("stay factual"));
        assert_eq!(converted.contents.len(), 1);
    }

    #[test]
    fn tool_use_input_round_trips_byte_for_byte() {
        let input = json!({"city": "Graz", "units": "metric", "n": 3});
        let converted = convert_request(&request(vec![Message {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "weather".to_string(),
                input: input.clone(),
            }]),
        }]));
        let call = converted.contents[0].parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.args.as_ref().unwrap()["query"], input);
        assert_eq!(converted.contents[0].role, Some(ContentRole::Model));
    }

    #[test]
    fn image_and_text_share_one_user_message() {
        let converted = convert_request(&request(vec![Message {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "describe".to_string(),
                },
                ContentBlock::Image {
                    source: ImageSource {
                        kind: "base64".to_string(),
                        media_type: None,
                        data: "aGk=".to_string(),
                    },
                },
            ]),
        }]));
        assert_eq!(converted.contents.len(), 1);
        let parts = &converted.contents[0].parts;
        assert_eq!(parts[0].text.as_deref(), Some("describe"));
        let blob = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "aGk=");
    }

    #[test]
    fn tool_result_resolves_the_call_name_from_the_prior_turn() {
        let converted = convert_request(&request(vec![
            Message {
                role: MessageRole::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "weather".to_string(),
                    input: json!({}),
                }]),
            },
            Message {
                role: MessageRole::User,
                content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: Some("toolu_1".to_string()),
                    id: None,
                    content: Some(ToolResultContent::Text("sunny".to_string())),
                    is_error: None,
                }]),
            },
        ]));
        let response = converted.contents[1].parts[0]
            .function_response
            .as_ref()
            .unwrap();
        assert_eq!(response.name, "weather");
        assert_eq!(response.id.as_deref(), Some("toolu_1"));
    }

    #[test]
    fn tool_result_textifies_nested_blocks() {
        let converted = convert_request(&request(vec![Message {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: Some("toolu_1".to_string()),
                id: None,
                content: Some(ToolResultContent::Blocks(vec![
                    ContentBlock::Text {
                        text: "line one".to_string(),
                    },
                    ContentBlock::Text {
                        text: "line two".to_string(),
                    },
                ])),
                is_error: None,
            }]),
        }]));
        let response = converted.contents[0].parts[0]
            .function_response
            .as_ref()
            .unwrap();
        assert_eq!(response.id.as_deref(), Some("toolu_1"));
        assert_eq!(response.response["output"], "line one\nline two");
    }
}
