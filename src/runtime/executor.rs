//! Conversation runtime executor

use super::traits::{LlmClient, ThreadStore};
use super::RuntimeError;

use crate::extract::{extract, ExtractionError};
use crate::lab::LabTitle;
use crate::llm::{ContentBlock, LlmMessage, LlmRequest, MessageRole};
use crate::state_machine::{
    transition, ChatMessage, ChatRole, ConvContext, Effect, Event, ExtractionOutput,
    ExtractionTarget, RequestMode, StreamEvent, ThreadState, ToolCall,
};
use crate::system_prompt::{
    build_system_prompt, stage_entry_message, title_extraction_prompt,
    TITLE_EXTRACTION_INSTRUCTION,
};
use crate::tools::ActionRegistry;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Runs one turn of one thread: feeds events through `transition`, executes
/// the resulting effects and forwards stream events to the sink.
pub struct ConversationRuntime<S, L>
where
    S: ThreadStore,
    L: LlmClient,
{
    context: ConvContext,
    state: ThreadState,
    store: S,
    llm: L,
    sink: mpsc::Sender<StreamEvent>,
}

impl<S, L> ConversationRuntime<S, L>
where
    S: ThreadStore,
    L: LlmClient,
{
    pub fn new(
        context: ConvContext,
        state: ThreadState,
        store: S,
        llm: L,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            context,
            state,
            store,
            llm,
            sink,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ThreadState {
        &self.state
    }

    /// Process client events until the turn settles
    pub async fn run_turn(&mut self, events: Vec<Event>) -> Result<(), RuntimeError> {
        tracing::info!(
            thread_id = %self.context.thread_id,
            stage = %self.state.stage,
            "Starting turn"
        );

        // FIFO so follow-up events run after the effects that produced them
        let mut queue: VecDeque<Event> = events.into();

        while let Some(event) = queue.pop_front() {
            let result = match transition(&self.state, &self.context, event) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(thread_id = %self.context.thread_id, error = %e, "Transition rejected");
                    self.emit(StreamEvent::Error {
                        content: e.to_string(),
                    })
                    .await;
                    return Err(e.into());
                }
            };

            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect).await? {
                    queue.push_back(generated);
                }
            }
        }

        tracing::info!(
            thread_id = %self.context.thread_id,
            stage = %self.state.stage,
            state = self.state.phase.name(),
            "Turn finished"
        );
        Ok(())
    }

    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, RuntimeError> {
        match effect {
            Effect::PersistThread => {
                if let Err(e) = self.store.save(&self.state).await {
                    tracing::error!(thread_id = %self.context.thread_id, error = %e, "Failed to persist thread");
                    self.emit(StreamEvent::Error {
                        content: format!("Failed to save conversation: {e}"),
                    })
                    .await;
                    return Err(RuntimeError::Store(e));
                }
                Ok(None)
            }

            Effect::Notify(event) => {
                self.emit(event).await;
                Ok(None)
            }

            Effect::RequestLlm { mode } => Ok(Some(self.request_llm(mode).await)),

            Effect::RequestExtraction { target } => Ok(Some(self.request_extraction(target).await)),
        }
    }

    async fn request_llm(&self, mode: RequestMode) -> Event {
        let stage = self.state.stage;
        let system = build_system_prompt(stage, mode, &self.state.lab);
        let mut request = LlmRequest::new(system, self.build_llm_messages());
        let mut offered = Vec::new();
        if mode == RequestMode::Chat {
            let registry = ActionRegistry::for_stage(stage);
            offered = registry.names();
            request = request.with_tools(registry.definitions());
        }

        tracing::info!(
            thread_id = %self.context.thread_id,
            stage = %stage,
            model = %self.llm.model_id(),
            ?mode,
            tools = ?offered,
            "Making LLM request"
        );

        match self.llm.complete(&request).await {
            Ok(response) => {
                let tool_calls: Vec<ToolCall> = response
                    .tool_uses()
                    .into_iter()
                    .map(|(id, name, input)| ToolCall::new(id, name, input.clone()))
                    .collect();
                for call in &tool_calls {
                    tracing::info!(
                        thread_id = %self.context.thread_id,
                        stage = %stage,
                        action = %call.name,
                        "Model requested action"
                    );
                }
                Event::LlmResponse {
                    text: response.text(),
                    tool_calls,
                    usage: response.usage,
                }
            }
            Err(e) => {
                tracing::warn!(
                    thread_id = %self.context.thread_id,
                    stage = %stage,
                    error = %e,
                    transient = e.kind.is_transient(),
                    "LLM request failed"
                );
                Event::LlmError {
                    message: e.message,
                    error_kind: e.kind,
                }
            }
        }
    }

    async fn request_extraction(&self, target: ExtractionTarget) -> Event {
        match target {
            ExtractionTarget::Title => {
                let mut messages = to_llm_messages(&self.state.messages);
                messages.push(LlmMessage::user(TITLE_EXTRACTION_INSTRUCTION));
                let system = title_extraction_prompt(&self.state.lab);

                match extract::<LabTitle, _>(&self.llm, system, messages).await {
                    Ok(title) => Event::ExtractionComplete {
                        output: ExtractionOutput::Title(title),
                    },
                    Err(ExtractionError::Llm(e)) => {
                        tracing::warn!(
                            thread_id = %self.context.thread_id,
                            action = "set_lab_title",
                            error = %e,
                            transient = e.kind.is_transient(),
                            "Title extraction request failed"
                        );
                        Event::LlmError {
                            message: e.message,
                            error_kind: e.kind,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            thread_id = %self.context.thread_id,
                            action = "set_lab_title",
                            error = %e,
                            "Title extraction failed"
                        );
                        Event::ExtractionFailed {
                            message: e.to_string(),
                        }
                    }
                }
            }
        }
    }

    /// History as model messages; a cleared history gets a stand-in user turn
    fn build_llm_messages(&self) -> Vec<LlmMessage> {
        let mut messages = to_llm_messages(&self.state.messages);
        if messages.is_empty() {
            messages.push(LlmMessage::user(stage_entry_message(self.state.stage)));
        }
        messages
    }

    async fn emit(&self, event: StreamEvent) {
        // A closed sink means the client went away; the turn still completes
        let _ = self.sink.send(event).await;
    }
}

/// Convert thread history to provider messages
pub(crate) fn to_llm_messages(history: &[ChatMessage]) -> Vec<LlmMessage> {
    history
        .iter()
        .map(|msg| match msg.role {
            ChatRole::User => LlmMessage::user(&msg.content),
            ChatRole::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(ContentBlock::text(&msg.content));
                }
                content.extend(
                    msg.tool_calls
                        .iter()
                        .map(|call| ContentBlock::tool_use(&call.id, &call.name, call.input.clone())),
                );
                LlmMessage {
                    role: MessageRole::Assistant,
                    content,
                }
            }
            // Tool results go in user message
            ChatRole::Tool => LlmMessage {
                role: MessageRole::User,
                content: vec![ContentBlock::tool_result(
                    msg.tool_call_id.as_deref().unwrap_or_default(),
                    &msg.content,
                    msg.is_error,
                )],
            },
        })
        .collect()
}
