//! Events that can occur in a conversation

use super::state::ToolCall;
use crate::lab::{LabRecord, LabTitle};
use crate::llm::{LlmErrorKind, Usage};

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Client events
    /// Thread opened without a message
    Start,
    UserMessage {
        text: String,
    },
    /// Lab data supplied by the caller, merged before the turn runs
    SeedContext {
        lab: LabRecord,
    },

    // LLM events
    LlmResponse {
        text: String,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    },
    LlmError {
        message: String,
        error_kind: LlmErrorKind,
    },

    // Extraction events
    ExtractionComplete {
        output: ExtractionOutput,
    },
    ExtractionFailed {
        message: String,
    },
}

/// A validated record returned by a forced extraction
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutput {
    Title(LabTitle),
}

impl Event {
    pub fn user_message(text: impl Into<String>) -> Self {
        Event::UserMessage { text: text.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::UserMessage { .. } => "user_message",
            Event::SeedContext { .. } => "seed_context",
            Event::LlmResponse { .. } => "llm_response",
            Event::LlmError { .. } => "llm_error",
            Event::ExtractionComplete { .. } => "extraction_complete",
            Event::ExtractionFailed { .. } => "extraction_failed",
        }
    }
}
