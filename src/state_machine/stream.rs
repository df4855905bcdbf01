//! Events streamed to clients while a turn runs

use super::state::{ThreadValues, UiMessage};
use serde::Serialize;
use serde_json::Value;

/// Outcome of an action, as shown on `tool` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Closed set of stream events, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "thinking")]
    Thinking { content: String },

    #[serde(rename = "tool")]
    Tool {
        name: String,
        status: ToolStatus,
        content: String,
    },

    /// Briefing text
    #[serde(rename = "story")]
    Story { content: String },

    #[serde(rename = "AIMessageChunk")]
    AiMessageChunk { id: String, content: String },

    #[serde(rename = "UIMessageChunk")]
    UiMessageChunk {
        id: String,
        name: String,
        props: Value,
        metadata: Value,
    },

    #[serde(rename = "values")]
    Values { values: ThreadValues },

    #[serde(rename = "done")]
    Done,

    #[serde(rename = "error")]
    Error { content: String },
}

impl StreamEvent {
    /// SSE event name, identical to the `type` field
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::Tool { .. } => "tool",
            StreamEvent::Story { .. } => "story",
            StreamEvent::AiMessageChunk { .. } => "AIMessageChunk",
            StreamEvent::UiMessageChunk { .. } => "UIMessageChunk",
            StreamEvent::Values { .. } => "values",
            StreamEvent::Done => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Last event of a turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    pub fn ui(message: &UiMessage) -> Self {
        StreamEvent::UiMessageChunk {
            id: message.id.clone(),
            name: message.name.clone(),
            props: message.props.clone(),
            metadata: message.metadata.clone(),
        }
    }
}
