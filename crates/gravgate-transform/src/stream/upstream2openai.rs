use gravgate_protocol::openai::response::{
    ChatCompletion, CompletionChoice, CompletionMessage, CompletionObject,
};
use gravgate_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkObject, FinishReason, ToolCallDelta,
    ToolCallDeltaFunction,
};
use gravgate_protocol::openai::types::{
    FunctionCallPayload, ToolCall, ToolCallKind, Usage,
};

use crate::event::{StreamEvent, ThinkingPhase, ToolCallOut};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Re-frames normalized events as OpenAI chat-completion chunks. Thinking
/// deltas are folded into the text stream between `<think>` tags.
#[derive(Debug)]
pub struct OpenAiStreamFramer {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    emitted_tool_calls: bool,
}

impl OpenAiStreamFramer {
    pub fn new(id: impl Into<String>, model: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created,
            role_sent: false,
            emitted_tool_calls: false,
        }
    }

    pub fn push_event(&mut self, event: StreamEvent) -> Vec<ChatCompletionChunk> {
        match event {
            StreamEvent::Text { delta } => {
                if delta.is_empty() {
                    Vec::new()
                } else {
                    vec![self.content_chunk(delta)]
                }
            }
            StreamEvent::Thinking { delta, phase } => match phase {
                ThinkingPhase::Start => vec![self.content_chunk(THINK_OPEN.to_string())],
                ThinkingPhase::Mid => {
                    if delta.is_empty() {
                        Vec::new()
                    } else {
                        vec![self.content_chunk(delta)]
                    }
                }
                ThinkingPhase::End => vec![self.content_chunk(THINK_CLOSE.to_string())],
            },
            StreamEvent::Image { mime, data } => {
                vec![self.content_chunk(format!("![Generated Image](data:{mime};base64,{data})"))]
            }
            StreamEvent::ToolCalls(calls) => {
                self.emitted_tool_calls = true;
                let deltas = calls
                    .iter()
                    .enumerate()
                    .map(|(index, call)| ToolCallDelta {
                        index: index as u32,
                        id: Some(call.id.clone()),
                        kind: ToolCallKind::Function,
                        function: ToolCallDeltaFunction {
                            name: Some(call.name.clone()),
                            arguments: Some(call.arguments.clone()),
                        },
                    })
                    .collect();
                let role = self.take_role();
                vec![self.chunk(
                    ChunkDelta {
                        role,
                        content: None,
                        tool_calls: Some(deltas),
                    },
                    None,
                    None,
                )]
            }
        }
    }

    /// Terminal frames: the finish-reason chunk, then a usage-only chunk.
    /// The router appends the literal `data: [DONE]` line.
    pub fn finish(&mut self, usage: Usage) -> Vec<ChatCompletionChunk> {
        let finish_reason = if self.emitted_tool_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        let role = self.take_role();
        vec![
            self.chunk(
                ChunkDelta {
                    role,
                    ..Default::default()
                },
                Some(finish_reason),
                None,
            ),
            ChatCompletionChunk {
                id: self.id.clone(),
                object: ChunkObject::ChatCompletionChunk,
                created: self.created,
                model: self.model.clone(),
                choices: Vec::new(),
                usage: Some(usage),
            },
        ]
    }

    fn content_chunk(&mut self, content: String) -> ChatCompletionChunk {
        let role = self.take_role();
        self.chunk(
            ChunkDelta {
                role,
                content: Some(content),
                tool_calls: None,
            },
            None,
            None,
        )
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChunkObject::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }

    fn take_role(&mut self) -> Option<String> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some("assistant".to_string())
        }
    }
}

/// Assemble the non-streaming completion body from collected events.
pub fn build_completion(
    id: impl Into<String>,
    model: impl Into<String>,
    created: i64,
    events: &[StreamEvent],
    usage: Usage,
) -> ChatCompletion {
    let mut content = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for event in events {
        match event {
            StreamEvent::Text { delta } => content.push_str(delta),
            StreamEvent::Thinking { delta, phase } => match phase {
                ThinkingPhase::Start => content.push_str(THINK_OPEN),
                ThinkingPhase::Mid => content.push_str(delta),
                ThinkingPhase::End => content.push_str(THINK_CLOSE),
            },
            StreamEvent::Image { mime, data } => {
                content.push_str(&format!("![Generated Image](data:{mime};base64,{data})"));
            }
            StreamEvent::ToolCalls(calls) => {
                tool_calls.extend(calls.iter().map(tool_call));
            }
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    };

    ChatCompletion {
        id: id.into(),
        object: CompletionObject::ChatCompletion,
        created,
        model: model.into(),
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage {
                role: "assistant".to_string(),
                content: (!content.is_empty()).then_some(content),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason,
        }],
        usage,
    }
}

fn tool_call(call: &ToolCallOut) -> ToolCall {
    ToolCall {
        id: call.id.clone(),
        kind: ToolCallKind::Function,
        function: FunctionCallPayload {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> OpenAiStreamFramer {
        OpenAiStreamFramer::new("chatcmpl-1", "gemini-2.5-pro", 1_700_000_000)
    }

    #[test]
    fn text_then_tool_call_then_finish_matches_the_protocol_order() {
        let mut framer = framer();
        let mut chunks = Vec::new();
        chunks.extend(framer.push_event(StreamEvent::Text {
            delta: "hi".to_string(),
        }));
        chunks.extend(framer.push_event(StreamEvent::ToolCalls(vec![ToolCallOut {
            id: "t1".to_string(),
            name: "lookup".to_string(),
            arguments: r#"{"q":"x"}"#.to_string(),
        }])));
        chunks.extend(framer.finish(Usage {
            prompt_tokens: 4,
            completion_tokens: 2,
            total_tokens: 6,
        }));

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("hi"));
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));

        let calls = chunks[1].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("t1"));

        assert_eq!(
            chunks[2].choices[0].finish_reason,
            Some(FinishReason::ToolCalls)
        );
        assert!(chunks[2].choices[0].delta.content.is_none());

        assert!(chunks[3].choices.is_empty());
        assert_eq!(chunks[3].usage.as_ref().unwrap().total_tokens, 6);
    }

    #[test]
    fn plain_text_finishes_with_stop() {
        let mut framer = framer();
        framer.push_event(StreamEvent::Text {
            delta: "hello".to_string(),
        });
        let chunks = framer.finish(Usage::default());
        assert_eq!(chunks[0].choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn thinking_is_wrapped_in_think_tags() {
        let mut framer = framer();
        let mut content = String::new();
        for event in [
            StreamEvent::Thinking {
                delta: String::new(),
                phase: ThinkingPhase::Start,
            },
            StreamEvent::Thinking {
                delta: "mull".to_string(),
                phase: ThinkingPhase::Mid,
            },
            StreamEvent::Thinking {
                delta: String::new(),
                phase: ThinkingPhase::End,
            },
            StreamEvent::Text {
                delta: "done".to_string(),
            },
        ] {
            for chunk in framer.push_event(event) {
                content.push_str(chunk.choices[0].delta.content.as_deref().unwrap_or(""));
            }
        }
        assert_eq!(content, "<think>mull</think>done");
    }

    #[test]
    fn role_is_sent_exactly_once() {
        let mut framer = framer();
        let first = framer.push_event(StreamEvent::Text {
            delta: "a".to_string(),
        });
        let second = framer.push_event(StreamEvent::Text {
            delta: "b".to_string(),
        });
        assert!(first[0].choices[0].delta.role.is_some());
        assert!(second[0].choices[0].delta.role.is_none());
    }

    #[test]
    fn non_streaming_body_collects_text_and_calls() {
        let events = vec![
            StreamEvent::Text {
                delta: "answer".to_string(),
            },
            StreamEvent::ToolCalls(vec![ToolCallOut {
                id: "t1".to_string(),
                name: "lookup".to_string(),
                arguments: "{}".to_string(),
            }]),
        ];
        let completion = build_completion(
            "chatcmpl-2",
            "gemini-2.5-pro",
            0,
            &events,
            Usage::default(),
        );
        let choice = &completion.choices[0];
        assert_eq!(choice.message.content.as_deref(), Some("answer"));
        assert_eq!(choice.message.tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(choice.finish_reason, FinishReason::ToolCalls);
    }
}
