//! Effects produced by state transitions

use super::state::{ExtractionTarget, RequestMode, ThreadState};
use super::stream::{StreamEvent, ToolStatus};

/// Effects to be executed after state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Checkpoint the new thread state
    PersistThread,

    /// Make an LLM request for the current stage
    RequestLlm { mode: RequestMode },

    /// Run a forced structured extraction
    RequestExtraction { target: ExtractionTarget },

    /// Forward an event to the client stream
    Notify(StreamEvent),
}

impl Effect {
    pub fn chat() -> Self {
        Effect::RequestLlm {
            mode: RequestMode::Chat,
        }
    }

    pub fn notify(event: StreamEvent) -> Self {
        Effect::Notify(event)
    }

    pub fn notify_message(id: impl Into<String>, content: impl Into<String>) -> Self {
        Effect::Notify(StreamEvent::AiMessageChunk {
            id: id.into(),
            content: content.into(),
        })
    }

    pub fn notify_tool(name: impl Into<String>, status: ToolStatus, content: impl Into<String>) -> Self {
        Effect::Notify(StreamEvent::Tool {
            name: name.into(),
            status,
            content: content.into(),
        })
    }

    pub fn notify_values(state: &ThreadState) -> Self {
        Effect::Notify(StreamEvent::Values {
            values: state.values(),
        })
    }

    pub fn notify_done() -> Self {
        Effect::Notify(StreamEvent::Done)
    }

    pub fn notify_error(content: impl Into<String>) -> Self {
        Effect::Notify(StreamEvent::Error {
            content: content.into(),
        })
    }
}
