//! Pure state transition function
//!
//! Given the same thread state, context and event this always produces the
//! same new state and effects. Model requests, persistence and streaming are
//! described as effects and carried out by the runtime.

use super::effect::Effect;
use super::event::{Event, ExtractionOutput};
use super::stage::Stage;
use super::state::{
    ChatMessage, ConvContext, ConvState, ErrorKind, ExtractionTarget, HistoryPolicy, RequestMode,
    ThreadState, ToolCall, UiMessage,
};
use super::stream::{StreamEvent, ToolStatus};
use crate::lab::{LabRecord, LabTitle, ValidationError};
use crate::tools::{Action, ActionRegistry};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub const GREETING: &str = "Hi! I'm your Lab Builder assistant. How can I help today?";

const ONE_ACTION_PER_TURN: &str =
    "Only one action can be taken per turn. This call was not executed; call it again if it is still needed.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ThreadState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ThreadState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Agent is busy, cannot accept message until the current turn finishes")]
    AgentBusy,
    #[error("Invalid lab context: {0}")]
    InvalidContext(#[from] ValidationError),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &ThreadState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.phase, event) {
        // ============================================================
        // Client Events
        // ============================================================
        (ConvState::Idle | ConvState::Error { .. }, Event::Start) => Ok(start(state)),

        (ConvState::Idle | ConvState::Error { .. }, Event::SeedContext { lab }) => {
            seed_context(state, lab)
        }

        // Error + UserMessage recovers the same way Idle does
        (ConvState::Idle | ConvState::Error { .. }, Event::UserMessage { text }) => {
            Ok(user_message(state, text))
        }

        (phase, Event::Start | Event::UserMessage { .. } | Event::SeedContext { .. })
            if phase.is_busy() =>
        {
            Err(TransitionError::AgentBusy)
        }

        // ============================================================
        // LLM Responses
        // ============================================================
        (
            ConvState::LlmRequesting {
                mode: RequestMode::Chat,
                step,
            },
            Event::LlmResponse {
                text, tool_calls, ..
            },
        ) => Ok(chat_response(state, context, *step, text, &tool_calls)),

        (
            ConvState::LlmRequesting {
                mode: RequestMode::Draft,
                step,
            },
            Event::LlmResponse { text, .. },
        ) => Ok(draft_response(state, context, *step, &text)),

        (
            ConvState::LlmRequesting { .. } | ConvState::Extracting { .. },
            Event::LlmError {
                message,
                error_kind,
            },
        ) => Ok(fail(state, message, error_kind.into())),

        // ============================================================
        // Extraction
        // ============================================================
        (
            ConvState::Extracting {
                target: ExtractionTarget::Title,
                ..
            },
            Event::ExtractionComplete {
                output: ExtractionOutput::Title(title),
            },
        ) => Ok(title_extracted(state, title)),

        (ConvState::Extracting { .. }, Event::ExtractionFailed { message }) => {
            Ok(fail(state, message, ErrorKind::Extraction))
        }

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} with event {}",
            phase.name(),
            event.name()
        ))),
    }
}

// ============================================================================
// Client Events
// ============================================================================

fn start(state: &ThreadState) -> TransitionResult {
    let mut new_state = state.clone();
    let mut effects = Vec::new();

    if state.is_fresh() {
        let id = new_state.next_id();
        new_state
            .messages
            .push(ChatMessage::assistant(id.clone(), GREETING, vec![]));
        effects.push(Effect::notify_message(id.clone(), GREETING));

        let ui = push_ui(
            &mut new_state,
            "QuickActions",
            json!({
                "actions": [
                    { "label": "Build a lab from scratch", "message": "I want to build a lab from scratch" },
                    { "label": "Review my existing lab", "message": "Review my lab" },
                ]
            }),
            &id,
        );
        effects.push(Effect::notify(StreamEvent::ui(&ui)));
        effects.push(Effect::PersistThread);
    }

    effects.push(Effect::notify_values(&new_state));
    effects.push(Effect::notify_done());
    TransitionResult::new(new_state).with_effects(effects)
}

fn seed_context(state: &ThreadState, lab: LabRecord) -> Result<TransitionResult, TransitionError> {
    lab.validate()?;

    let LabRecord {
        requirements,
        title,
        briefing,
        questions,
    } = lab;

    let mut new_state = state.clone();
    if requirements.is_some() {
        new_state.lab.requirements = requirements;
    }
    if title.is_some() {
        new_state.lab.title = title;
    }
    if briefing.is_some() {
        new_state.lab.briefing = briefing;
    }
    if !questions.is_empty() {
        new_state.lab.questions = questions;
    }

    Ok(TransitionResult::new(new_state).with_effect(Effect::PersistThread))
}

fn user_message(state: &ThreadState, text: String) -> TransitionResult {
    let mut new_state = state.clone();
    let id = new_state.next_id();
    new_state.messages.push(ChatMessage::user(id, text));

    let (phase, request) = stage_request(new_state.stage, &new_state.lab, 1);
    new_state.phase = phase;

    TransitionResult::new(new_state)
        .with_effect(Effect::PersistThread)
        .with_effect(request)
}

/// The request a stage needs next: its entry step if that has not produced
/// its record yet, otherwise a chat request
fn stage_request(stage: Stage, lab: &LabRecord, step: u32) -> (ConvState, Effect) {
    match stage {
        Stage::Title if lab.title.is_none() => (
            ConvState::Extracting {
                target: ExtractionTarget::Title,
                step,
            },
            Effect::RequestExtraction {
                target: ExtractionTarget::Title,
            },
        ),
        Stage::Briefing if lab.briefing.is_none() => (
            ConvState::LlmRequesting {
                mode: RequestMode::Draft,
                step,
            },
            Effect::RequestLlm {
                mode: RequestMode::Draft,
            },
        ),
        _ => (
            ConvState::LlmRequesting {
                mode: RequestMode::Chat,
                step,
            },
            Effect::chat(),
        ),
    }
}

// ============================================================================
// LLM Responses
// ============================================================================

/// Outcome of an action that passed validation
struct Applied {
    result: String,
    transfer_to: Option<Stage>,
}

impl Applied {
    fn stay(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            transfer_to: None,
        }
    }
}

fn chat_response(
    state: &ThreadState,
    context: &ConvContext,
    step: u32,
    text: String,
    tool_calls: &[ToolCall],
) -> TransitionResult {
    let mut new_state = state.clone();
    let mut effects = Vec::new();
    let id = new_state.next_id();

    let Some((first, rest)) = tool_calls.split_first() else {
        // Plain reply ends the turn
        if !text.trim().is_empty() {
            new_state
                .messages
                .push(ChatMessage::assistant(id.clone(), text.clone(), vec![]));
            effects.push(Effect::notify_message(id, text));
        }
        new_state.phase = ConvState::Idle;
        effects.push(Effect::PersistThread);
        effects.push(Effect::notify_values(&new_state));
        effects.push(Effect::notify_done());
        return TransitionResult::new(new_state).with_effects(effects);
    };

    new_state.messages.push(ChatMessage::assistant(
        id.clone(),
        text.clone(),
        tool_calls.to_vec(),
    ));
    if !text.trim().is_empty() {
        effects.push(Effect::notify_message(id.clone(), text));
    }

    let outcome = ActionRegistry::for_stage(new_state.stage)
        .parse(&first.name, &first.input)
        .map_err(|e| e.to_string())
        .and_then(|action| apply_action(&mut new_state, action, &id, &mut effects));

    let transfer_to = match outcome {
        Ok(applied) => {
            push_tool_result(&mut new_state, &mut effects, first, &applied.result, false);
            applied.transfer_to
        }
        Err(reason) => {
            push_tool_result(&mut new_state, &mut effects, first, &reason, true);
            None
        }
    };

    // Every call needs a result before history can be cleared
    for extra in rest {
        push_tool_result(&mut new_state, &mut effects, extra, ONE_ACTION_PER_TURN, true);
    }

    if let Some(next) = transfer_to {
        new_state.stage = next;
        if context.history_policy == HistoryPolicy::ClearOnTransfer {
            new_state.messages.clear();
        }
        effects.push(Effect::notify(StreamEvent::Thinking {
            content: format!("Moving on to the {next} stage"),
        }));
    }

    continue_turn(new_state, context, step, effects)
}

fn draft_response(
    state: &ThreadState,
    context: &ConvContext,
    step: u32,
    text: &str,
) -> TransitionResult {
    let briefing = text.trim();
    if briefing.is_empty() {
        return fail(
            state,
            "The model returned an empty briefing draft".to_string(),
            ErrorKind::Extraction,
        );
    }

    let mut new_state = state.clone();
    new_state.lab.briefing = Some(briefing.to_string());
    let id = new_state.next_id();
    new_state
        .messages
        .push(ChatMessage::assistant(id, briefing, vec![]));

    let effects = vec![Effect::notify(StreamEvent::Story {
        content: briefing.to_string(),
    })];

    // The follow-up chat request asks the user for feedback
    continue_turn(new_state, context, step, effects)
}

/// Re-prompt the model in the current stage, unless the step limit is hit
fn continue_turn(
    mut new_state: ThreadState,
    context: &ConvContext,
    step: u32,
    mut effects: Vec<Effect>,
) -> TransitionResult {
    if step >= context.max_steps_per_turn {
        let message = format!(
            "Stopped after {} model requests in one turn",
            context.max_steps_per_turn
        );
        new_state.phase = ConvState::Error {
            message: message.clone(),
            error_kind: ErrorKind::StepLimit,
        };
        effects.push(Effect::PersistThread);
        effects.push(Effect::notify_error(message));
        return TransitionResult::new(new_state).with_effects(effects);
    }

    let (phase, request) = stage_request(new_state.stage, &new_state.lab, step + 1);
    new_state.phase = phase;
    effects.push(Effect::PersistThread);
    effects.push(request);
    TransitionResult::new(new_state).with_effects(effects)
}

/// Execute a validated action against the thread
fn apply_action(
    state: &mut ThreadState,
    action: Action,
    message_id: &str,
    effects: &mut Vec<Effect>,
) -> Result<Applied, String> {
    match action {
        Action::SetLabRequirements(requirements) => {
            let result = format!(
                "Lab requirements recorded: topic \"{}\", target persona \"{}\", difficulty level {}.",
                requirements.topic, requirements.target_persona, requirements.difficulty_level
            );
            let ui = push_ui(state, "Requirements", to_props(&requirements), message_id);
            effects.push(Effect::notify(StreamEvent::ui(&ui)));
            state.lab.requirements = Some(requirements);
            Ok(Applied::stay(result))
        }

        Action::SetLabTitle(title) => {
            let result = format!("Lab title set to \"{}\".", title.title);
            let ui = push_ui(state, "Title", to_props(&title), message_id);
            effects.push(Effect::notify(StreamEvent::ui(&ui)));
            state.lab.title = Some(title);
            Ok(Applied::stay(result))
        }

        Action::SetBriefing(input) => {
            effects.push(Effect::notify(StreamEvent::Story {
                content: input.briefing.clone(),
            }));
            state.lab.briefing = Some(input.briefing);
            Ok(Applied::stay("Briefing updated."))
        }

        Action::CreateQuestion(question) => {
            let index = state.lab.questions.len();
            let ui = push_ui(
                state,
                "Question",
                json!({ "index": index, "question": to_props(&question) }),
                message_id,
            );
            effects.push(Effect::notify(StreamEvent::ui(&ui)));
            let result = format!(
                "Question {} created with correct answer \"{}\".",
                index + 1,
                question.correct_option().unwrap_or_default()
            );
            state.lab.questions.push(question);
            Ok(Applied::stay(result))
        }

        Action::TransferToNextStage => {
            let stage = state.stage;
            if !stage.precondition_met(&state.lab) {
                return Err(format!(
                    "Cannot leave the {stage} stage until {}.",
                    stage.precondition()
                ));
            }
            let next = stage
                .next()
                .ok_or_else(|| format!("The {stage} stage is final."))?;
            Ok(Applied {
                result: format!("Transferred to the {next} stage."),
                transfer_to: Some(next),
            })
        }
    }
}

fn push_tool_result(
    state: &mut ThreadState,
    effects: &mut Vec<Effect>,
    call: &ToolCall,
    content: &str,
    is_error: bool,
) {
    let id = state.next_id();
    state
        .messages
        .push(ChatMessage::tool(id, &call.id, content, is_error));
    let status = if is_error {
        ToolStatus::Error
    } else {
        ToolStatus::Success
    };
    effects.push(Effect::notify_tool(&call.name, status, content));
}

// ============================================================================
// Extraction
// ============================================================================

fn title_extracted(state: &ThreadState, title: LabTitle) -> TransitionResult {
    let mut new_state = state.clone();
    let id = new_state.next_id();

    let content = if title.explanation.trim().is_empty() {
        format!("I suggest the title **{}**.", title.title)
    } else {
        format!("**{}**\n\n{}", title.title, title.explanation)
    };
    new_state
        .messages
        .push(ChatMessage::assistant(id.clone(), content.clone(), vec![]));

    let ui = push_ui(&mut new_state, "Title", to_props(&title), &id);
    new_state.lab.title = Some(title);
    new_state.phase = ConvState::Idle;

    let effects = vec![
        Effect::PersistThread,
        Effect::notify_message(id, content),
        Effect::notify(StreamEvent::ui(&ui)),
        Effect::notify_values(&new_state),
        Effect::notify_done(),
    ];
    TransitionResult::new(new_state).with_effects(effects)
}

// ============================================================================
// Helpers
// ============================================================================

fn fail(state: &ThreadState, message: String, error_kind: ErrorKind) -> TransitionResult {
    let mut new_state = state.clone();
    new_state.phase = ConvState::Error {
        message: message.clone(),
        error_kind,
    };
    TransitionResult::new(new_state)
        .with_effect(Effect::PersistThread)
        .with_effect(Effect::notify_error(message))
}

fn push_ui(state: &mut ThreadState, name: &str, props: Value, message_id: &str) -> UiMessage {
    let ui = UiMessage {
        id: state.next_ui_id(),
        name: name.to_string(),
        props,
        metadata: json!({ "message_id": message_id }),
    };
    state.ui.push(ui.clone());
    ui
}

fn to_props(record: &impl Serialize) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}
