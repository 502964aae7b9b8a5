use gravgate_protocol::upstream::response::{FinishReason, StreamChunk, UsageMetadata};
use gravgate_protocol::upstream::types::Part;

use crate::event::{StreamEvent, ThinkingPhase, ToolCallOut, thought_signature_sentinel};

/// Incremental reader over decoded upstream frames: tracks thinking mode,
/// accumulates function calls until a finish reason flushes them, and emits
/// normalized events in source order.
#[derive(Debug, Default)]
pub struct UpstreamReader {
    thinking: bool,
    pending_calls: Vec<ToolCallOut>,
    fallback_call_index: usize,
    finish_reason: Option<FinishReason>,
    usage: Option<UsageMetadata>,
}

impl UpstreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn usage(&self) -> Option<&UsageMetadata> {
        self.usage.as_ref()
    }

    /// Feed one `data:` payload. Frames that fail to decode are skipped.
    pub fn push_payload(&mut self, payload: &str) -> Vec<StreamEvent> {
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(_) => return Vec::new(),
        };
        let Some(response) = chunk.response else {
            return Vec::new();
        };
        if let Some(usage) = response.usage_metadata {
            self.usage = Some(usage);
        }
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some(content) = candidate.content {
            for part in content.parts {
                self.handle_part(part, &mut events);
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(reason);
            if !self.pending_calls.is_empty() {
                self.end_thinking(&mut events);
                events.push(StreamEvent::ToolCalls(std::mem::take(
                    &mut self.pending_calls,
                )));
            }
        }

        events
    }

    /// EOF: close a dangling thinking run.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        self.end_thinking(&mut events);
        events
    }

    fn handle_part(&mut self, part: Part, events: &mut Vec<StreamEvent>) {
        if part.thought == Some(true) {
            if !self.thinking {
                self.thinking = true;
                events.push(StreamEvent::Thinking {
                    delta: String::new(),
                    phase: ThinkingPhase::Start,
                });
            }
            events.push(StreamEvent::Thinking {
                delta: part.text.unwrap_or_default(),
                phase: ThinkingPhase::Mid,
            });
            return;
        }

        if let Some(text) = part.text {
            self.end_thinking(events);
            let mut delta = text;
            if let Some(signature) = part.thought_signature {
                delta.push_str(&thought_signature_sentinel(&signature));
            }
            if let Some(blob) = &part.inline_data {
                delta.push_str(&format!(
                    "![Generated Image](data:{};base64,{})",
                    blob.mime_type, blob.data
                ));
            }
            events.push(StreamEvent::Text { delta });
        } else if let Some(blob) = part.inline_data {
            self.end_thinking(events);
            events.push(StreamEvent::Image {
                mime: blob.mime_type,
                data: blob.data,
            });
        }

        if let Some(call) = part.function_call {
            let id = call.id.unwrap_or_else(|| {
                self.fallback_call_index += 1;
                format!("tool_call_{}", self.fallback_call_index)
            });
            let arguments = call
                .args
                .map(|args| serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string()))
                .unwrap_or_else(|| "{}".to_string());
            self.pending_calls.push(ToolCallOut {
                id,
                name: call.name,
                arguments,
            });
        }
    }

    fn end_thinking(&mut self, events: &mut Vec<StreamEvent>) {
        if self.thinking {
            self.thinking = false;
            events.push(StreamEvent::Thinking {
                delta: String::new(),
                phase: ThinkingPhase::End,
            });
        }
    }
}
