use serde_json::json;

use gravgate_protocol::openai::types::{ChatMessage, ContentPart, MessageContent, ToolCall};
use gravgate_protocol::upstream::types::{
    Blob, Content, ContentRole, FunctionCall, FunctionResponse, Part,
};

use crate::event::strip_thought_signature;

/// Convert OpenAI chat messages into upstream contents.
///
/// `system` and `user` map to the upstream `user` role, `assistant` to
/// `model`. Assistant turns carrying only tool calls merge into a preceding
/// model message; tool results merge into a preceding user message that
/// already holds a function response.
pub fn convert_messages(messages: &[ChatMessage]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();

    for message in messages {
        match message {
            ChatMessage::System { content } | ChatMessage::User { content } => {
                let parts = map_content_parts(content);
                if !parts.is_empty() {
                    contents.push(Content {
                        parts,
                        role: Some(ContentRole::User),
                    });
                }
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                push_assistant(&mut contents, content.as_ref(), tool_calls.as_deref());
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                push_tool_result(&mut contents, content, tool_call_id);
            }
        }
    }

    contents
}

fn push_assistant(
    contents: &mut Vec<Content>,
    content: Option<&MessageContent>,
    tool_calls: Option<&[ToolCall]>,
) {
    let text = content.map(|value| value.text()).unwrap_or_default();
    let call_parts: Vec<Part> = tool_calls
        .unwrap_or_default()
        .iter()
        .map(function_call_part)
        .collect();

    // A tool-only assistant turn continues the previous model message when
    // the model already pre-emitted its intent there.
    if text.is_empty() && !call_parts.is_empty() {
        if let Some(previous) = contents.last_mut()
            && previous.role == Some(ContentRole::Model)
        {
            previous.parts.extend(call_parts);
            return;
        }
        contents.push(Content {
            parts: call_parts,
            role: Some(ContentRole::Model),
        });
        return;
    }

    let mut parts = Vec::new();
    if !text.is_empty() {
        let (cleaned, signature) = strip_thought_signature(&text);
        parts.push(Part {
            text: Some(cleaned),
            thought_signature: signature,
            ..Default::default()
        });
    }
    parts.extend(call_parts);
    if !parts.is_empty() {
        contents.push(Content {
            parts,
            role: Some(ContentRole::Model),
        });
    }
}

fn push_tool_result(contents: &mut Vec<Content>, content: &MessageContent, tool_call_id: &str) {
    let name = resolve_call_name(contents, tool_call_id)
        .unwrap_or_else(|| tool_call_id.to_string());
    let part = Part {
        function_response: Some(FunctionResponse {
            id: Some(tool_call_id.to_string()),
            name,
            response: json!({ "output": content.text() }),
        }),
        ..Default::default()
    };

    if let Some(previous) = contents.last_mut()
        && previous.role == Some(ContentRole::User)
        && previous
            .parts
            .iter()
            .any(|existing| existing.function_response.is_some())
    {
        previous.parts.push(part);
        return;
    }

    contents.push(Content {
        parts: vec![part],
        role: Some(ContentRole::User),
    });
}

/// Walk backward to find the call this result answers.
fn resolve_call_name(contents: &[Content], tool_call_id: &str) -> Option<String> {
    for content in contents.iter().rev() {
        for part in &content.parts {
            if let Some(call) = &part.function_call
                && call.id.as_deref() == Some(tool_call_id)
            {
                return Some(call.name.clone());
            }
        }
    }
    None
}

fn function_call_part(call: &ToolCall) -> Part {
    Part {
        function_call: Some(FunctionCall {
            id: Some(call.id.clone()),
            name: call.function.name.clone(),
            // The raw arguments string rides under `query` and gets
            // stringified a second time on re-emission.
            args: Some(json!({ "query": call.function.arguments })),
        }),
        ..Default::default()
    }
}

fn map_content_parts(content: &MessageContent) -> Vec<Part> {
    match content {
        MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![Part {
                    text: Some(text.clone()),
                    ..Default::default()
                }]
            }
        }
        MessageContent::Parts(items) => {
            let mut text_buffer = String::new();
            let mut image_parts = Vec::new();
            for item in items {
                match item {
                    ContentPart::Text { text } => text_buffer.push_str(text),
                    ContentPart::ImageUrl { image_url } => {
                        if let Some((mime, data)) = parse_data_url(&image_url.url) {
                            image_parts.push(Part {
                                inline_data: Some(Blob {
                                    mime_type: mime,
                                    data,
                                }),
                                ..Default::default()
                            });
                        }
                    }
                }
            }
            let mut parts = Vec::new();
            if !text_buffer.is_empty() {
                parts.push(Part {
                    text: Some(text_buffer),
                    ..Default::default()
                });
            }
            parts.extend(image_parts);
            parts
        }
    }
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let url = url.strip_prefix("data:")?;
    let (meta, data) = url.split_once(',')?;
    let (mime, encoding) = meta.split_once(';')?;
    if encoding != "base64" || !mime.starts_with("image/") {
        return None;
    }
    Some((mime.to_string(), data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravgate_protocol::openai::types::{
        FunctionCallPayload, ImageUrl, ToolCallKind,
    };

    fn user(text: &str) -> ChatMessage {
        ChatMessage::User {
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            kind: ToolCallKind::Function,
            function: FunctionCallPayload {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn system_and_user_both_map_to_user_role() {
        let contents = convert_messages(&[
            ChatMessage::System {
                content: MessageContent::Text("be brief".to_string()),
            },
            user("hello"),
        ]);
        assert_eq!(contents.len(), 2);
        assert!(
            contents
                .iter()
                .all(|content| content.role == Some(ContentRole::User))
        );
    }

    #[test]
    fn textual_translation_is_idempotent() {
        let contents = convert_messages(&[
            user("one"),
            ChatMessage::Assistant {
                content: Some(MessageContent::Text("two".to_string())),
                tool_calls: None,
            },
            user("three"),
        ]);
        let joined: String = contents
            .iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.text.clone())
            .collect();
        assert_eq!(joined, "onetwothree");
    }

    #[test]
    fn thought_signature_is_lifted_onto_the_part() {
        let contents = convert_messages(&[ChatMessage::Assistant {
            content: Some(MessageContent::Text(
                "reasoning…<!-- thought_signature: ABC -->".to_string(),
            )),
            tool_calls: None,
        }]);
        let part = &contents[0].parts[0];
        assert_eq!(part.text.as_deref(), Some("reasoning…"));
        assert_eq!(part.thought_signature.as_deref(), Some("ABC"));
        assert_eq!(contents[0].role, Some(ContentRole::Model));
    }

    #[test]
    fn tool_arguments_are_wrapped_as_query_string() {
        let contents = convert_messages(&[ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![tool_call("t1", "lookup", r#"{"q":"x"}"#)]),
        }]);
        let call = contents[0].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.args.as_ref().unwrap()["query"], r#"{"q":"x"}"#);
    }

    #[test]
    fn tool_only_assistant_merges_into_previous_model_message() {
        let contents = convert_messages(&[
            ChatMessage::Assistant {
                content: Some(MessageContent::Text("let me check".to_string())),
                tool_calls: None,
            },
            ChatMessage::Assistant {
                content: None,
                tool_calls: Some(vec![tool_call("t1", "lookup", "{}")]),
            },
        ]);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].parts.len(), 2);
        assert!(contents[0].parts[1].function_call.is_some());
    }

    #[test]
    fn assistant_with_text_and_calls_stays_a_separate_message() {
        let contents = convert_messages(&[
            ChatMessage::Assistant {
                content: Some(MessageContent::Text("first".to_string())),
                tool_calls: None,
            },
            ChatMessage::Assistant {
                content: Some(MessageContent::Text("second".to_string())),
                tool_calls: Some(vec![tool_call("t1", "lookup", "{}")]),
            },
        ]);
        assert_eq!(contents.len(), 2);
    }

    #[test]
    fn tool_result_resolves_the_call_name_backward() {
        let contents = convert_messages(&[
            ChatMessage::Assistant {
                content: None,
                tool_calls: Some(vec![tool_call("t1", "lookup", "{}")]),
            },
            ChatMessage::Tool {
                content: MessageContent::Text("42".to_string()),
                tool_call_id: "t1".to_string(),
            },
        ]);
        let response = contents[1].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "lookup");
        assert_eq!(response.id.as_deref(), Some("t1"));
        assert_eq!(response.response["output"], "42");
    }

    #[test]
    fn consecutive_tool_results_share_one_user_message() {
        let contents = convert_messages(&[
            ChatMessage::Assistant {
                content: None,
                tool_calls: Some(vec![
                    tool_call("t1", "lookup", "{}"),
                    tool_call("t2", "fetch", "{}"),
                ]),
            },
            ChatMessage::Tool {
                content: MessageContent::Text("a".to_string()),
                tool_call_id: "t1".to_string(),
            },
            ChatMessage::Tool {
                content: MessageContent::Text("b".to_string()),
                tool_call_id: "t2".to_string(),
            },
        ]);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1].parts.len(), 2);
    }

    #[test]
    fn data_url_images_become_inline_data() {
        let contents = convert_messages(&[ChatMessage::User {
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "describe".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,aGk=".to_string(),
                    },
                },
            ]),
        }]);
        assert_eq!(contents[0].parts.len(), 2);
        let blob = contents[0].parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "aGk=");
    }

    #[test]
    fn non_data_urls_are_dropped() {
        let contents = convert_messages(&[ChatMessage::User {
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/cat.png".to_string(),
                },
            }]),
        }]);
        assert!(contents.is_empty());
    }
}
