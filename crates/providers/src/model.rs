//! The internal chat-completion shape shared by every provider dialect.

use serde::{Deserialize, Serialize};

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: UserContent,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: UserContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// User content: plain text or an ordered block sequence (vision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { url: String },
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The internal request driving every provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Canonical tool schemas: `{name, description, parameters}`.
    pub tools: Vec<serde_json::Value>,
    pub stream: bool,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Response from a non-streaming completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// Events emitted while decoding a streaming completion. Each dialect's
/// decoder converts upstream framing into this canonical sequence.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Text content delta.
    Delta(String),
    /// A tool call started (id and name known, arguments follow).
    ToolCallStart { id: String, name: String, index: usize },
    /// JSON fragment to append to a tool call's arguments.
    ToolCallArgumentsDelta { index: usize, delta: String },
    /// A tool call's arguments are complete.
    ToolCallComplete { index: usize },
    /// Stream completed successfully.
    Done(Usage),
    /// The upstream errored mid-stream.
    Error(String),
}

/// Accumulates tool-call fragments across stream chunks and yields the
/// completed calls. This is the small state machine behind the synthesized
/// final chunk.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    partial: Vec<PartialCall>,
}

#[derive(Debug)]
struct PartialCall {
    index: usize,
    id: String,
    name: String,
    arguments: String,
    complete: bool,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream event. Returns true when the event was consumed
    /// (tool-call bookkeeping), false when the caller should handle it.
    pub fn observe(&mut self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::ToolCallStart { id, name, index } => {
                self.partial.push(PartialCall {
                    index: *index,
                    id: id.clone(),
                    name: name.clone(),
                    arguments: String::new(),
                    complete: false,
                });
                true
            },
            StreamEvent::ToolCallArgumentsDelta { index, delta } => {
                if let Some(call) = self.partial.iter_mut().find(|c| c.index == *index) {
                    call.arguments.push_str(delta);
                }
                true
            },
            StreamEvent::ToolCallComplete { index } => {
                if let Some(call) = self.partial.iter_mut().find(|c| c.index == *index) {
                    call.complete = true;
                }
                true
            },
            _ => false,
        }
    }

    pub fn has_calls(&self) -> bool {
        !self.partial.is_empty()
    }

    /// The completed calls, in index order. Unterminated fragments are
    /// included too — an upstream that never sent the completion marker
    /// still produced the arguments it produced.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut calls = self.partial;
        calls.sort_by_key(|c| c.index);
        calls
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.name,
                arguments: serde_json::from_str(&c.arguments)
                    .unwrap_or(serde_json::Value::Object(serde_json::Map::new())),
            })
            .collect()
    }
}
