use serde_json::Value as JsonValue;

use gravgate_common::GatewayError;
use gravgate_protocol::claude::response::{MessagesResponse, ResponseBlock};
use gravgate_protocol::claude::stream::{
    ContentBlockDelta, MessagesStreamEvent, MessageDeltaBody, StreamContentBlock, StreamMessage,
};
use gravgate_protocol::claude::types::{MessagesUsage, StopReason};

use crate::event::{StreamEvent, ThinkingPhase, ToolCallOut};

const TEXT_BLOCK_INDEX: u32 = 0;

/// Re-frames normalized events as Anthropic messages-stream events. The text
/// block holds index 0; thinking and tool-use blocks take indexes from 1 up.
#[derive(Debug)]
pub struct ClaudeStreamFramer {
    message_id: String,
    model: String,
    stop_sequences: Vec<String>,
    max_tokens: Option<u32>,
    text_open: bool,
    thinking_index: Option<u32>,
    next_block_index: u32,
    accumulated_text: String,
    emitted_tool_calls: bool,
}

impl ClaudeStreamFramer {
    pub fn new(
        message_id: impl Into<String>,
        model: impl Into<String>,
        stop_sequences: Vec<String>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            stop_sequences,
            max_tokens,
            text_open: false,
            thinking_index: None,
            next_block_index: 1,
            accumulated_text: String::new(),
            emitted_tool_calls: false,
        }
    }

    pub fn start(&self) -> MessagesStreamEvent {
        MessagesStreamEvent::MessageStart {
            message: StreamMessage {
                id: self.message_id.clone(),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: MessagesUsage::default(),
            },
        }
    }

    pub fn push_event(
        &mut self,
        event: StreamEvent,
    ) -> Result<Vec<MessagesStreamEvent>, GatewayError> {
        match event {
            StreamEvent::Text { delta } => Ok(self.text_delta(delta)),
            StreamEvent::Image { mime, data } => {
                Ok(self.text_delta(format!("![Generated Image](data:{mime};base64,{data})")))
            }
            StreamEvent::Thinking { delta, phase } => Ok(self.thinking_event(delta, phase)),
            StreamEvent::ToolCalls(calls) => self.tool_events(calls),
        }
    }

    /// Close open blocks and emit `message_delta` + `message_stop`.
    pub fn finish(
        &mut self,
        mut usage: MessagesUsage,
        output_tokens: u32,
    ) -> Vec<MessagesStreamEvent> {
        let mut events = Vec::new();
        if let Some(index) = self.thinking_index.take() {
            events.push(MessagesStreamEvent::ContentBlockStop { index });
        }
        if self.text_open {
            self.text_open = false;
            events.push(MessagesStreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
        }

        usage.output_tokens = output_tokens;
        let (stop_reason, stop_sequence) = self.resolve_stop(output_tokens);
        events.push(MessagesStreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence,
            },
            usage,
        });
        events.push(MessagesStreamEvent::MessageStop);
        events
    }

    fn text_delta(&mut self, delta: String) -> Vec<MessagesStreamEvent> {
        if delta.is_empty() {
            return Vec::new();
        }
        let mut events = Vec::new();
        if !self.text_open {
            self.text_open = true;
            events.push(MessagesStreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: StreamContentBlock::Text {
                    text: String::new(),
                },
            });
        }
        self.accumulated_text.push_str(&delta);
        events.push(MessagesStreamEvent::ContentBlockDelta {
            index: TEXT_BLOCK_INDEX,
            delta: ContentBlockDelta::TextDelta { text: delta },
        });
        events
    }

    fn thinking_event(&mut self, delta: String, phase: ThinkingPhase) -> Vec<MessagesStreamEvent> {
        match phase {
            ThinkingPhase::Start => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.thinking_index = Some(index);
                vec![MessagesStreamEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::Thinking {
                        thinking: String::new(),
                    },
                }]
            }
            ThinkingPhase::Mid => {
                let Some(index) = self.thinking_index else {
                    return Vec::new();
                };
                if delta.is_empty() {
                    return Vec::new();
                }
                vec![MessagesStreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::ThinkingDelta { thinking: delta },
                }]
            }
            ThinkingPhase::End => match self.thinking_index.take() {
                Some(index) => vec![MessagesStreamEvent::ContentBlockStop { index }],
                None => Vec::new(),
            },
        }
    }

    fn tool_events(
        &mut self,
        calls: Vec<ToolCallOut>,
    ) -> Result<Vec<MessagesStreamEvent>, GatewayError> {
        let mut events = Vec::new();
        for call in calls {
            let input = parse_call_arguments(&call)?;
            let index = self.next_block_index;
            self.next_block_index += 1;
            self.emitted_tool_calls = true;
            events.push(MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: StreamContentBlock::ToolUse {
                    id: call.id,
                    name: call.name,
                    input,
                },
            });
            events.push(MessagesStreamEvent::ContentBlockStop { index });
        }
        Ok(events)
    }

    fn resolve_stop(&self, output_tokens: u32) -> (StopReason, Option<String>) {
        if self.emitted_tool_calls {
            return (StopReason::ToolUse, None);
        }
        for sequence in &self.stop_sequences {
            if !sequence.is_empty() && self.accumulated_text.ends_with(sequence.as_str()) {
                return (StopReason::StopSequence, Some(sequence.clone()));
            }
        }
        if let Some(cap) = self.max_tokens
            && output_tokens >= cap
        {
            return (StopReason::MaxTokens, None);
        }
        (StopReason::EndTurn, None)
    }
}

/// Assemble the non-streaming message body from collected events.
pub fn build_message(
    message_id: impl Into<String>,
    model: impl Into<String>,
    events: &[StreamEvent],
    stop_sequences: &[String],
    max_tokens: Option<u32>,
    mut usage: MessagesUsage,
    output_tokens: u32,
) -> Result<MessagesResponse, GatewayError> {
    let mut thinking = String::new();
    let mut text = String::new();
    let mut tool_blocks = Vec::new();

    for event in events {
        match event {
            StreamEvent::Text { delta } => text.push_str(delta),
            StreamEvent::Image { mime, data } => {
                text.push_str(&format!("![Generated Image](data:{mime};base64,{data})"));
            }
            StreamEvent::Thinking { delta, .. } => thinking.push_str(delta),
            StreamEvent::ToolCalls(calls) => {
                for call in calls {
                    let input = parse_call_arguments(call)?;
                    tool_blocks.push(ResponseBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input,
                    });
                }
            }
        }
    }

    let mut content = Vec::new();
    if !thinking.is_empty() {
        content.push(ResponseBlock::Thinking { thinking });
    }
    if !text.is_empty() {
        content.push(ResponseBlock::Text { text: text.clone() });
    }

    let (stop_reason, stop_sequence) = if !tool_blocks.is_empty() {
        (StopReason::ToolUse, None)
    } else if let Some(sequence) = stop_sequences
        .iter()
        .find(|sequence| !sequence.is_empty() && text.ends_with(sequence.as_str()))
    {
        (StopReason::StopSequence, Some(sequence.clone()))
    } else if max_tokens.is_some_and(|cap| output_tokens >= cap) {
        (StopReason::MaxTokens, None)
    } else {
        (StopReason::EndTurn, None)
    };
    content.extend(tool_blocks);

    usage.output_tokens = output_tokens;
    Ok(MessagesResponse {
        id: message_id.into(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.into(),
        stop_reason: Some(stop_reason),
        stop_sequence,
        usage,
    })
}

fn parse_call_arguments(call: &ToolCallOut) -> Result<JsonValue, GatewayError> {
    serde_json::from_str(&call.arguments).map_err(|err| {
        GatewayError::ToolArgsParse(format!("tool {} arguments: {err}", call.name))
    })
}
