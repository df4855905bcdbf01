//! Conversation state types

use super::stage::Stage;
use crate::lab::LabRecord;
use crate::llm::LlmErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default cap on model requests within one turn
pub const DEFAULT_MAX_STEPS: u32 = 25;

// ============================================================================
// Messages
// ============================================================================

/// Who authored a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

/// A tool call as the model signaled it, before it is parsed into an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// One entry of the message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    /// Assistant only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn user(id: String, content: impl Into<String>) -> Self {
        Self {
            id,
            role: ChatRole::User,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn assistant(id: String, content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            id,
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            is_error: false,
        }
    }

    pub fn tool(
        id: String,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            id,
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: Some(tool_call_id.into()),
            is_error,
        }
    }
}

/// Message kind as the front-end names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "HumanMessage")]
    Human,
    #[serde(rename = "AIMessage")]
    Ai,
}

/// A history message as served to clients; tool traffic is not shown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
}

impl ClientMessage {
    pub fn from_history(msg: &ChatMessage) -> Option<Self> {
        let kind = match msg.role {
            ChatRole::User => MessageType::Human,
            ChatRole::Assistant => MessageType::Ai,
            ChatRole::Tool => return None,
        };
        Some(Self {
            id: msg.id.clone(),
            kind,
            content: msg.content.clone(),
        })
    }
}

/// A structured component pushed to the front-end, attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub name: String,
    pub props: Value,
    #[serde(default)]
    pub metadata: Value,
}

// ============================================================================
// Control Phase
// ============================================================================

/// Error classification persisted with the `Error` phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    RateLimit,
    ServerError,
    Auth,
    InvalidRequest,
    /// Structured extraction produced nothing usable
    Extraction,
    /// The turn hit `max_steps_per_turn`
    StepLimit,
    Unknown,
}

impl From<LlmErrorKind> for ErrorKind {
    fn from(kind: LlmErrorKind) -> Self {
        match kind {
            LlmErrorKind::Network => ErrorKind::Network,
            LlmErrorKind::RateLimit => ErrorKind::RateLimit,
            LlmErrorKind::ServerError => ErrorKind::ServerError,
            LlmErrorKind::Auth => ErrorKind::Auth,
            LlmErrorKind::InvalidRequest => ErrorKind::InvalidRequest,
            LlmErrorKind::Unknown => ErrorKind::Unknown,
        }
    }
}

/// Shape of a model request issued by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Stage prompt with the stage's permitted actions
    Chat,
    /// Tool-less request whose text becomes the briefing
    Draft,
}

/// Records produced by a forced extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTarget {
    Title,
}

/// Control phase of a thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Awaiting the next user message
    #[default]
    Idle,

    /// Model request in flight; `step` counts requests in this turn
    LlmRequesting { mode: RequestMode, step: u32 },

    /// Forced extraction in flight
    Extracting { target: ExtractionTarget, step: u32 },

    /// The last turn failed; recovers on the next user message
    Error { message: String, error_kind: ErrorKind },
}

impl ConvState {
    /// A turn is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConvState::LlmRequesting { .. } | ConvState::Extracting { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::LlmRequesting { .. } => "llm_requesting",
            ConvState::Extracting { .. } => "extracting",
            ConvState::Error { .. } => "error",
        }
    }
}

// ============================================================================
// Thread State
// ============================================================================

/// Everything persisted for one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    #[serde(default)]
    pub stage: Stage,
    #[serde(default)]
    pub phase: ConvState,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub ui: Vec<UiMessage>,
    #[serde(default)]
    pub lab: LabRecord,
    /// Source of message ids; never reset, so ids stay unique across clears
    #[serde(default)]
    pub next_seq: u64,
}

impl ThreadState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            stage: Stage::default(),
            phase: ConvState::Idle,
            messages: vec![],
            ui: vec![],
            lab: LabRecord::default(),
            next_seq: 0,
        }
    }

    /// Allocate the next message id
    pub fn next_id(&mut self) -> String {
        self.next_seq += 1;
        format!("msg-{}", self.next_seq)
    }

    /// Allocate the next UI message id, from the same sequence
    pub fn next_ui_id(&mut self) -> String {
        self.next_seq += 1;
        format!("ui-{}", self.next_seq)
    }

    /// Nothing has been said on this thread yet
    pub fn is_fresh(&self) -> bool {
        self.messages.is_empty() && self.ui.is_empty()
    }

    /// Client-facing snapshot
    pub fn values(&self) -> ThreadValues {
        ThreadValues {
            messages: self
                .messages
                .iter()
                .filter_map(ClientMessage::from_history)
                .collect(),
            ui: self.ui.clone(),
            stage: self.stage,
            lab: self.lab.clone(),
            state: self.phase.clone(),
        }
    }
}

/// Snapshot of a thread as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadValues {
    pub messages: Vec<ClientMessage>,
    pub ui: Vec<UiMessage>,
    pub stage: Stage,
    pub lab: LabRecord,
    pub state: ConvState,
}

// ============================================================================
// Context
// ============================================================================

/// What happens to message history when the flow moves to the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// The next stage starts from a clean context
    #[default]
    ClearOnTransfer,
    Preserve,
}

impl std::str::FromStr for HistoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clear" | "clear_on_transfer" => Ok(HistoryPolicy::ClearOnTransfer),
            "preserve" => Ok(HistoryPolicy::Preserve),
            other => Err(format!("unknown history policy: {other}")),
        }
    }
}

/// Per-thread configuration, immutable during a turn
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub thread_id: String,
    pub history_policy: HistoryPolicy,
    pub max_steps_per_turn: u32,
}

impl ConvContext {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            history_policy: HistoryPolicy::default(),
            max_steps_per_turn: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps_per_turn = max_steps.max(1);
        self
    }
}
