use serde::Deserialize;

use crate::payload::OllamaToolCall;

/// Raw NDJSON line emitted by the backend while streaming.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaChatChunk {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<OllamaChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<OllamaToolCall>,
}

/// Accounting reported on the final line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OllamaDoneStats {
    pub model: Option<String>,
    pub done_reason: Option<String>,
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
}

/// Stream event emitted by the parser after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum OllamaStreamEvent {
    ContentDelta(String),
    ThinkingDelta(String),
    ToolCalls(Vec<OllamaToolCall>),
    Done(OllamaDoneStats),
}

impl OllamaChatChunk {
    /// Split one line into events. A line may carry text, a reasoning fragment
    /// and tool calls at once; they are emitted in that order, followed by
    /// `Done` when the line is terminal.
    pub fn into_events(self) -> Vec<OllamaStreamEvent> {
        let mut events = Vec::new();
        if let Some(message) = self.message {
            if let Some(thinking) = message.thinking.filter(|value| !value.is_empty()) {
                events.push(OllamaStreamEvent::ThinkingDelta(thinking));
            }
            if let Some(content) = message.content.filter(|value| !value.is_empty()) {
                events.push(OllamaStreamEvent::ContentDelta(content));
            }
            if !message.tool_calls.is_empty() {
                events.push(OllamaStreamEvent::ToolCalls(message.tool_calls));
            }
        }
        if self.done {
            events.push(OllamaStreamEvent::Done(OllamaDoneStats {
                model: self.model,
                done_reason: self.done_reason,
                prompt_eval_count: self.prompt_eval_count,
                eval_count: self.eval_count,
            }));
        }
        events
    }
}
