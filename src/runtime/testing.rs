//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, Usage};
use crate::state_machine::StreamEvent;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue a response consisting of a single tool call
    pub fn queue_tool_call(&self, id: &str, name: &str, input: Value) {
        self.queue_response(tool_response(id, name, input));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Response carrying one tool call and no text
pub fn tool_response(id: &str, name: &str, input: Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::tool_use(id, name, input)],
        usage: Usage::default(),
    }
}

/// Read every event already sent on a turn's stream
pub fn drain_events(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for a spawned turn's stream to close, collecting its events
pub async fn collect_turn(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn event_types(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::event_type).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::{LabRecord, LabRequirements, LabTitle};
    use crate::llm::{LlmErrorKind, ToolChoice};
    use crate::runtime::{ConversationRuntime, RuntimeError, RuntimeManager, TurnRequest};
    use crate::state_machine::{
        ChatRole, ConvContext, ConvState, ErrorKind, Event, HistoryPolicy, MessageType, Stage,
        ThreadState, GREETING,
    };
    use crate::tools::TRANSFER_TO_NEXT_STAGE;
    use serde_json::json;
    use std::sync::Arc;

    type TestRuntime = ConversationRuntime<Arc<MemoryStore>, Arc<MockLlmClient>>;

    fn test_runtime(
        context: ConvContext,
        state: ThreadState,
    ) -> (
        TestRuntime,
        Arc<MemoryStore>,
        Arc<MockLlmClient>,
        mpsc::Receiver<StreamEvent>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlmClient::new("mock-model"));
        let (tx, rx) = mpsc::channel(256);
        let runtime = ConversationRuntime::new(context, state, store.clone(), llm.clone(), tx);
        (runtime, store, llm, rx)
    }

    fn requirements_lab() -> LabRecord {
        LabRecord {
            requirements: Some(LabRequirements::new("SQL injection", "beginners", 2).unwrap()),
            ..LabRecord::default()
        }
    }

    #[tokio::test]
    async fn test_mock_llm_client() {
        let client = MockLlmClient::new("test-model");
        client.queue_response(LlmResponse::text_only("Hello!"));

        let request = LlmRequest::new("system", vec![]);
        let response = client.complete(&request).await.unwrap();
        assert_eq!(response.text(), "Hello!");
        assert_eq!(client.recorded_requests().len(), 1);

        let err = client.complete(&request).await.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Network);
    }

    #[tokio::test]
    async fn test_start_greets_fresh_thread() {
        let (mut runtime, store, llm, mut rx) =
            test_runtime(ConvContext::new("t"), ThreadState::new("t"));

        runtime.run_turn(vec![Event::Start]).await.unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(
            event_types(&events),
            vec!["AIMessageChunk", "UIMessageChunk", "values", "done"]
        );
        assert!(matches!(
            &events[0],
            StreamEvent::AiMessageChunk { content, .. } if content == GREETING
        ));
        assert!(llm.recorded_requests().is_empty());

        let saved = store.load("t").await.unwrap().unwrap();
        assert_eq!(saved.messages.len(), 1);
        assert_eq!(saved.ui[0].name, "QuickActions");
    }

    #[tokio::test]
    async fn test_requirements_scenario_advances_after_confirmation() {
        let (mut runtime, store, llm, mut rx) =
            test_runtime(ConvContext::new("t"), ThreadState::new("t"));

        // First turn: the model records requirements, then asks for confirmation
        llm.queue_tool_call(
            "call_1",
            "set_lab_requirements",
            json!({"topic": "SQL injection", "target_persona": "beginners", "difficulty_level": 2}),
        );
        llm.queue_response(LlmResponse::text_only("Does that look right?"));

        runtime
            .run_turn(vec![Event::user_message(
                "I want a lab on SQL injection for beginners, difficulty 2",
            )])
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(
            event_types(&events),
            vec!["UIMessageChunk", "tool", "AIMessageChunk", "values", "done"]
        );
        assert_eq!(runtime.state().stage, Stage::Requirements);
        assert_eq!(runtime.state().lab, requirements_lab());

        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        let offered: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["set_lab_requirements", TRANSFER_TO_NEXT_STAGE]);
        // The tool result goes back to the model on the follow-up request
        assert_eq!(requests[1].messages.len(), 3);

        // Second turn: user confirms, the model transfers, the title stage
        // opens with a forced proposal
        llm.queue_tool_call("call_2", TRANSFER_TO_NEXT_STAGE, json!({}));
        llm.queue_tool_call(
            "call_3",
            "set_lab_title",
            json!({"title": "Drop Table Academy", "explanation": "A playful nod to SQL injection."}),
        );

        runtime
            .run_turn(vec![Event::user_message("Yes, looks good")])
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Thinking { content } if content.contains("title"))));
        assert_eq!(events.last().map(StreamEvent::event_type), Some("done"));

        let state = runtime.state();
        assert_eq!(state.stage, Stage::Title);
        assert_eq!(state.phase, ConvState::Idle);
        assert_eq!(state.lab.requirements, requirements_lab().requirements);
        assert_eq!(
            state.lab.title.as_ref().map(|t| t.title.as_str()),
            Some("Drop Table Academy")
        );
        // History was cleared on transfer; only the title message remains
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, ChatRole::Assistant);

        let requests = llm.recorded_requests();
        let extraction = requests.last().unwrap();
        assert_eq!(
            extraction.tool_choice,
            ToolChoice::Required("set_lab_title".to_string())
        );
        assert_eq!(extraction.messages.len(), 1);
        assert!(extraction.system_text().contains("Topic: SQL injection"));

        assert_eq!(store.load("t").await.unwrap().as_ref(), Some(state));
    }

    #[tokio::test]
    async fn test_out_of_range_difficulty_is_rejected_and_reprompted() {
        let (mut runtime, _store, llm, mut rx) =
            test_runtime(ConvContext::new("t"), ThreadState::new("t"));

        llm.queue_tool_call(
            "call_1",
            "set_lab_requirements",
            json!({"topic": "SQL injection", "target_persona": "beginners", "difficulty_level": 9}),
        );
        llm.queue_response(LlmResponse::text_only(
            "Difficulty goes from 1 to 7. Which level would you like?",
        ));

        runtime
            .run_turn(vec![Event::user_message("Make it difficulty 9")])
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Tool { status: crate::state_machine::ToolStatus::Error, .. }
        )));
        assert_eq!(runtime.state().lab, LabRecord::default());
        assert_eq!(runtime.state().stage, Stage::Requirements);

        // The rejection reached the model as an error tool result
        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(matches!(
            requests[1].messages.last().unwrap().content[0],
            ContentBlock::ToolResult { is_error: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_llm_error_ends_turn_in_error_phase() {
        let (mut runtime, store, llm, mut rx) =
            test_runtime(ConvContext::new("t"), ThreadState::new("t"));
        llm.queue_error(LlmError::rate_limit("slow down"));

        runtime
            .run_turn(vec![Event::user_message("hello")])
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(events.last().map(StreamEvent::event_type), Some("error"));
        let saved = store.load("t").await.unwrap().unwrap();
        assert!(matches!(
            saved.phase,
            ConvState::Error { error_kind: ErrorKind::RateLimit, .. }
        ));

        // Next message recovers
        llm.queue_response(LlmResponse::text_only("Hi again"));
        runtime
            .run_turn(vec![Event::user_message("hello?")])
            .await
            .unwrap();
        assert_eq!(runtime.state().phase, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_title_extraction_transport_failure_keeps_error_kind() {
        let mut state = ThreadState::new("t");
        state.lab = requirements_lab();
        let (mut runtime, store, llm, mut rx) = test_runtime(ConvContext::new("t"), state);

        llm.queue_tool_call("call_1", TRANSFER_TO_NEXT_STAGE, json!({}));
        llm.queue_error(LlmError::rate_limit("slow down"));

        runtime
            .run_turn(vec![Event::user_message("Looks good, next")])
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(events.last().map(StreamEvent::event_type), Some("error"));
        let saved = store.load("t").await.unwrap().unwrap();
        assert_eq!(saved.stage, Stage::Title);
        assert!(matches!(
            saved.phase,
            ConvState::Error { error_kind: ErrorKind::RateLimit, .. }
        ));
    }

    #[tokio::test]
    async fn test_briefing_draft_then_feedback_request() {
        let mut state = ThreadState::new("t");
        state.stage = Stage::Briefing;
        state.lab = requirements_lab();
        state.lab.title = Some(LabTitle {
            title: "Drop Table Academy".to_string(),
            explanation: String::new(),
        });
        let (mut runtime, _store, llm, mut rx) = test_runtime(ConvContext::new("t"), state);

        llm.queue_response(LlmResponse::text_only("You join a startup whose login page..."));
        llm.queue_response(LlmResponse::text_only("What would you like to change?"));

        runtime
            .run_turn(vec![Event::user_message("Go ahead")])
            .await
            .unwrap();

        let events = drain_events(&mut rx);
        assert_eq!(events[0].event_type(), "story");
        assert_eq!(
            runtime.state().lab.briefing.as_deref(),
            Some("You join a startup whose login page...")
        );

        let requests = llm.recorded_requests();
        assert!(requests[0].tools.is_empty());
        assert!(!requests[1].tools.is_empty());
    }

    #[tokio::test]
    async fn test_step_limit_stops_runaway_turn() {
        let context = ConvContext::new("t").with_max_steps(3);
        let (mut runtime, _store, llm, mut rx) = test_runtime(context, ThreadState::new("t"));
        for i in 0..5 {
            llm.queue_tool_call(&format!("call_{i}"), TRANSFER_TO_NEXT_STAGE, json!({}));
        }

        runtime
            .run_turn(vec![Event::user_message("next")])
            .await
            .unwrap();

        assert_eq!(llm.recorded_requests().len(), 3);
        assert!(matches!(
            runtime.state().phase,
            ConvState::Error { error_kind: ErrorKind::StepLimit, .. }
        ));
        let events = drain_events(&mut rx);
        assert_eq!(events.last().map(StreamEvent::event_type), Some("error"));
    }

    #[tokio::test]
    async fn test_preserve_policy_keeps_history_across_transfer() {
        let context = ConvContext::new("t").with_history_policy(HistoryPolicy::Preserve);
        let mut state = ThreadState::new("t");
        state.lab = requirements_lab();
        let (mut runtime, _store, llm, _rx) = test_runtime(context, state);

        llm.queue_tool_call("call_1", TRANSFER_TO_NEXT_STAGE, json!({}));
        llm.queue_tool_call(
            "call_2",
            "set_lab_title",
            json!({"title": "Injection Junction", "explanation": "Rhymes."}),
        );

        runtime
            .run_turn(vec![Event::user_message("next stage please")])
            .await
            .unwrap();

        assert_eq!(runtime.state().stage, Stage::Title);
        // user, assistant call, tool result, title message
        assert_eq!(runtime.state().messages.len(), 4);
        let extraction = llm.recorded_requests().pop().unwrap();
        assert_eq!(extraction.messages.len(), 4);
    }

    // ========================================================================
    // RuntimeManager
    // ========================================================================

    fn test_manager() -> (RuntimeManager, Arc<MemoryStore>, Arc<MockLlmClient>) {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLlmClient::new("mock-model"));
        let manager = RuntimeManager::new(store.clone(), llm.clone());
        (manager, store, llm)
    }

    #[tokio::test]
    async fn test_manager_runs_turn_to_completion() {
        let (manager, _store, llm) = test_manager();
        llm.queue_response(LlmResponse::text_only("What topic should the lab cover?"));

        let rx = manager
            .begin_turn(
                "t",
                TurnRequest {
                    message: Some("I want to build a lab".to_string()),
                    context: None,
                },
            )
            .await
            .unwrap();
        let events = collect_turn(rx).await;
        assert_eq!(event_types(&events), vec!["AIMessageChunk", "values", "done"]);

        let values = manager.snapshot("t").await.unwrap();
        assert_eq!(values.messages.len(), 2);
        assert_eq!(values.messages[0].kind, MessageType::Human);
        assert_eq!(values.messages[1].kind, MessageType::Ai);
        assert_eq!(values.state, ConvState::Idle);

        // The lock is free again once the stream has closed
        llm.queue_response(LlmResponse::text_only("Great"));
        let rx = manager
            .begin_turn(
                "t",
                TurnRequest {
                    message: Some("XSS".to_string()),
                    context: None,
                },
            )
            .await
            .unwrap();
        collect_turn(rx).await;
        assert_eq!(manager.snapshot("t").await.unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_manager_rejects_concurrent_turn() {
        let (manager, _store, _llm) = test_manager();
        let _guard = manager.try_lock_thread("t").unwrap();

        let err = manager
            .begin_turn("t", TurnRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Busy(id) if id == "t"));

        // Other threads are unaffected
        let rx = manager
            .begin_turn("other", TurnRequest::default())
            .await
            .unwrap();
        assert_eq!(collect_turn(rx).await.last().map(StreamEvent::event_type), Some("done"));
    }

    #[tokio::test]
    async fn test_manager_requires_message_on_existing_thread() {
        let (manager, _store, _llm) = test_manager();
        collect_turn(manager.begin_turn("t", TurnRequest::default()).await.unwrap()).await;

        let err = manager
            .begin_turn("t", TurnRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MissingMessage(_)));
    }

    #[tokio::test]
    async fn test_manager_rejects_invalid_context() {
        let (manager, _store, _llm) = test_manager();
        let lab = LabRecord {
            requirements: Some(LabRequirements {
                topic: "XSS".to_string(),
                target_persona: "devs".to_string(),
                difficulty_level: 12,
            }),
            ..LabRecord::default()
        };

        let err = manager
            .begin_turn(
                "t",
                TurnRequest {
                    message: None,
                    context: Some(lab),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidContext(_)));
    }

    #[tokio::test]
    async fn test_manager_seeds_context_without_advancing() {
        let (manager, _store, _llm) = test_manager();
        let rx = manager
            .begin_turn(
                "t",
                TurnRequest {
                    message: None,
                    context: Some(requirements_lab()),
                },
            )
            .await
            .unwrap();
        collect_turn(rx).await;

        let values = manager.snapshot("t").await.unwrap();
        assert_eq!(values.lab, requirements_lab());
        assert_eq!(values.stage, Stage::Requirements);
    }

    #[tokio::test]
    async fn test_manager_recovers_thread_left_mid_turn() {
        let (manager, store, llm) = test_manager();
        let mut stuck = ThreadState::new("t");
        let id = stuck.next_id();
        stuck
            .messages
            .push(crate::state_machine::ChatMessage::user(id, "hello"));
        stuck.phase = ConvState::LlmRequesting {
            mode: crate::state_machine::RequestMode::Chat,
            step: 1,
        };
        store.save(&stuck).await.unwrap();

        llm.queue_response(LlmResponse::text_only("Sorry, where were we?"));
        let rx = manager
            .begin_turn(
                "t",
                TurnRequest {
                    message: Some("hello?".to_string()),
                    context: None,
                },
            )
            .await
            .unwrap();
        let events = collect_turn(rx).await;
        assert_eq!(events.last().map(StreamEvent::event_type), Some("done"));
        assert_eq!(manager.snapshot("t").await.unwrap().state, ConvState::Idle);
    }

    #[tokio::test]
    async fn test_manager_frees_lock_entries() {
        let (manager, _store, llm) = test_manager();

        llm.queue_response(LlmResponse::text_only("Which topic?"));
        let rx = manager
            .begin_turn(
                "done",
                TurnRequest {
                    message: Some("Build a lab".to_string()),
                    context: None,
                },
            )
            .await
            .unwrap();
        collect_turn(rx).await;
        assert_eq!(manager.lock_count(), 0);

        // Rejected requests leave nothing behind either
        for i in 0..100 {
            let err = manager
                .begin_turn("done", TurnRequest::default())
                .await
                .unwrap_err();
            assert!(matches!(err, RuntimeError::MissingMessage(_)));
            let bad = LabRecord {
                requirements: Some(LabRequirements {
                    topic: "XSS".to_string(),
                    target_persona: "devs".to_string(),
                    difficulty_level: 0,
                }),
                ..LabRecord::default()
            };
            let err = manager
                .begin_turn(
                    &format!("random-{i}"),
                    TurnRequest {
                        message: None,
                        context: Some(bad),
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidContext(_)));
        }
        assert_eq!(manager.lock_count(), 0);

        let guard = manager.try_lock_thread("held").unwrap();
        assert!(matches!(
            manager.begin_turn("held", TurnRequest::default()).await,
            Err(RuntimeError::Busy(_))
        ));
        assert_eq!(manager.lock_count(), 1);
        drop(guard);
        assert_eq!(manager.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_manager_snapshot_unknown_thread() {
        let (manager, _store, _llm) = test_manager();
        assert!(matches!(
            manager.snapshot("nope").await,
            Err(RuntimeError::ThreadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manager_create_and_list_threads() {
        let (manager, _store, _llm) = test_manager();
        let created = manager.create_thread().await.unwrap();
        assert!(created.messages.is_empty());

        let threads = manager.list().await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].stage, Stage::Requirements);
    }
}
