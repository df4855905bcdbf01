//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::DEFAULT_MAX_STEPS;
use super::*;
use crate::lab::{LabRecord, LabRequirements, LabTitle, Question};
use crate::llm::{LlmErrorKind, Usage};
use crate::tools::TRANSFER_TO_NEXT_STAGE;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashSet;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(policy: HistoryPolicy) -> ConvContext {
    ConvContext::new("test-thread").with_history_policy(policy)
}

fn llm_response(calls: Vec<(String, Value)>) -> Event {
    Event::LlmResponse {
        text: String::new(),
        tool_calls: calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, input))| ToolCall::new(format!("call_{i}"), name, input))
            .collect(),
        usage: Usage::default(),
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::Requirements),
        Just(Stage::Title),
        Just(Stage::Briefing),
        Just(Stage::Questions),
        Just(Stage::Complete),
    ]
}

fn arb_policy() -> impl Strategy<Value = HistoryPolicy> {
    prop_oneof![
        Just(HistoryPolicy::ClearOnTransfer),
        Just(HistoryPolicy::Preserve)
    ]
}

fn arb_requirements() -> impl Strategy<Value = LabRequirements> {
    ("[a-zA-Z ]{1,20}[a-z]", "[a-z]{1,12}", 1i64..=7).prop_map(|(topic, persona, level)| {
        LabRequirements {
            topic,
            target_persona: persona,
            difficulty_level: level,
        }
    })
}

fn arb_question() -> impl Strategy<Value = Question> {
    prop::collection::vec("[a-z]{1,8}", 2..6).prop_flat_map(|options| {
        let len = i64::try_from(options.len()).unwrap();
        (Just(options), 0..len).prop_map(|(options, index)| Question {
            title: "Which one?".to_string(),
            options,
            correct_option_index: index,
        })
    })
}

fn arb_lab() -> impl Strategy<Value = LabRecord> {
    (
        prop::option::of(arb_requirements()),
        prop::option::of("[a-zA-Z]{1,20}"),
        prop::option::of("[a-zA-Z ]{0,30}[a-z]"),
        prop::collection::vec(arb_question(), 0..3),
    )
        .prop_map(|(requirements, title, briefing, questions)| LabRecord {
            requirements,
            title: title.map(|title| LabTitle {
                title,
                explanation: String::new(),
            }),
            briefing,
            questions,
        })
}

/// Tool calls the model might make, valid or not
fn arb_tool_call() -> impl Strategy<Value = (String, Value)> {
    prop_oneof![
        arb_requirements().prop_map(|r| ("set_lab_requirements".to_string(), json!(r))),
        (-5i64..15).prop_map(|level| (
            "set_lab_requirements".to_string(),
            json!({"topic": "XSS", "target_persona": "devs", "difficulty_level": level})
        )),
        "[a-zA-Z]{0,10}".prop_map(|title| (
            "set_lab_title".to_string(),
            json!({"title": title, "explanation": "why"})
        )),
        "[a-z ]{0,20}".prop_map(|b| ("set_briefing".to_string(), json!({ "briefing": b }))),
        arb_question().prop_map(|q| ("create_question".to_string(), json!(q))),
        (-2i64..6).prop_map(|index| (
            "create_question".to_string(),
            json!({"title": "Q", "options": ["a", "b", "c"], "correct_option_index": index})
        )),
        Just((TRANSFER_TO_NEXT_STAGE.to_string(), json!({}))),
        Just(("bash".to_string(), json!({"command": "ls"}))),
        Just(("set_briefing".to_string(), json!("{not json"))),
    ]
}

fn arb_llm_response() -> impl Strategy<Value = Event> {
    prop::collection::vec(arb_tool_call(), 0..4).prop_map(llm_response)
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Start),
        "[a-zA-Z ]{1,30}".prop_map(Event::user_message),
        arb_llm_response(),
        arb_llm_response(),
        arb_llm_response(),
        "[a-z ]{0,30}".prop_map(|text| Event::LlmResponse {
            text,
            tool_calls: vec![],
            usage: Usage::default(),
        }),
        Just(Event::LlmError {
            message: "Server error".to_string(),
            error_kind: LlmErrorKind::ServerError,
        }),
        "[a-zA-Z]{1,10}".prop_map(|title| Event::ExtractionComplete {
            output: ExtractionOutput::Title(LabTitle {
                title,
                explanation: "fits".to_string(),
            }),
        }),
        Just(Event::ExtractionFailed {
            message: "no output".to_string(),
        }),
    ]
}

fn arb_chatting_state() -> impl Strategy<Value = ThreadState> {
    (arb_stage(), arb_lab(), 1u32..DEFAULT_MAX_STEPS).prop_map(|(stage, lab, step)| {
        let mut state = ThreadState::new("test-thread");
        state.stage = stage;
        state.lab = lab;
        state.phase = ConvState::LlmRequesting {
            mode: RequestMode::Chat,
            step,
        };
        state
    })
}

// ============================================================================
// Invariants
// ============================================================================

fn check_record_invariants(state: &ThreadState) -> Result<(), TestCaseError> {
    if let Some(req) = &state.lab.requirements {
        prop_assert!((1..=7).contains(&req.difficulty_level));
    }
    for q in &state.lab.questions {
        prop_assert!(q.correct_option().is_some());
    }
    Ok(())
}

fn check_history(
    before: &ThreadState,
    after: &ThreadState,
    context: &ConvContext,
) -> Result<(), TestCaseError> {
    let grew = after.messages.len() >= before.messages.len()
        && after.messages[..before.messages.len()] == before.messages[..];
    let cleared = after.messages.is_empty()
        && after.stage != before.stage
        && context.history_policy == HistoryPolicy::ClearOnTransfer;
    prop_assert!(grew || cleared, "history neither grew nor was cleared on transfer");
    Ok(())
}

fn check_tool_results_paired(state: &ThreadState) -> Result<(), TestCaseError> {
    let mut pending: HashSet<&str> = HashSet::new();
    for message in &state.messages {
        match message.role {
            ChatRole::Assistant => {
                prop_assert!(pending.is_empty(), "tool call left without a result");
                pending = message.tool_calls.iter().map(|c| c.id.as_str()).collect();
            }
            ChatRole::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or_default();
                prop_assert!(pending.remove(id), "tool result without a matching call");
            }
            ChatRole::User => {}
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_stage_never_advances_without_precondition(
        state in arb_chatting_state(),
        policy in arb_policy(),
    ) {
        let before = state.clone();
        let result = transition(
            &state,
            &test_context(policy),
            llm_response(vec![(TRANSFER_TO_NEXT_STAGE.to_string(), json!({}))]),
        ).unwrap();

        if result.new_state.stage == before.stage {
            prop_assert!(
                !before.stage.precondition_met(&before.lab) || before.stage.is_terminal()
            );
        } else {
            prop_assert!(before.stage.precondition_met(&before.lab));
            prop_assert_eq!(Some(result.new_state.stage), before.stage.next());
        }
    }

    #[test]
    fn prop_rejected_actions_leave_lab_unchanged(
        state in arb_chatting_state(),
        level in prop_oneof![-10i64..1, 8i64..20],
    ) {
        let result = transition(
            &state,
            &test_context(HistoryPolicy::ClearOnTransfer),
            llm_response(vec![(
                "set_lab_requirements".to_string(),
                json!({"topic": "SQL injection", "target_persona": "beginners", "difficulty_level": level}),
            )]),
        ).unwrap();

        prop_assert_eq!(&result.new_state.lab, &state.lab);
        prop_assert_eq!(result.new_state.stage, state.stage);
        prop_assert!(result.new_state.messages.last().unwrap().is_error);
        let reprompted = result
            .effects
            .iter()
            .any(|e| matches!(e, Effect::RequestLlm { .. } | Effect::RequestExtraction { .. }));
        prop_assert!(reprompted);
    }

    #[test]
    fn prop_at_most_one_action_per_model_turn(
        state in arb_chatting_state(),
        questions in prop::collection::vec(arb_question(), 1..5),
    ) {
        let mut state = state;
        state.stage = Stage::Questions;
        let before = state.lab.questions.len();
        let calls = questions
            .into_iter()
            .map(|q| ("create_question".to_string(), json!(q)))
            .collect::<Vec<_>>();
        let call_count = calls.len();

        let result = transition(
            &state,
            &test_context(HistoryPolicy::Preserve),
            llm_response(calls),
        ).unwrap();

        prop_assert_eq!(result.new_state.lab.questions.len(), before + 1);
        let errors = result
            .new_state
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::Tool && m.is_error)
            .count();
        prop_assert_eq!(errors, call_count - 1);
    }

    #[test]
    fn prop_busy_rejects_client_events(state in arb_chatting_state(), text in "[a-z]{1,10}") {
        let context = test_context(HistoryPolicy::ClearOnTransfer);
        prop_assert!(matches!(
            transition(&state, &context, Event::user_message(text)),
            Err(TransitionError::AgentBusy)
        ));
        prop_assert!(matches!(
            transition(&state, &context, Event::Start),
            Err(TransitionError::AgentBusy)
        ));
    }

    #[test]
    fn prop_step_limit_bounds_a_turn(
        responses in prop::collection::vec(arb_llm_response(), 1..40),
        max_steps in 1u32..6,
    ) {
        let context = ConvContext::new("t")
            .with_history_policy(HistoryPolicy::Preserve)
            .with_max_steps(max_steps);
        let mut state = transition(&ThreadState::new("t"), &context, Event::user_message("go"))
            .unwrap()
            .new_state;
        let mut requests = 1u32;

        for event in responses {
            let Ok(result) = transition(&state, &context, event) else { break };
            state = result.new_state;
            if !state.phase.is_busy() {
                break;
            }
            requests += 1;
        }
        prop_assert!(requests <= max_steps);
    }

    #[test]
    fn prop_invariants_hold_over_event_sequences(
        events in prop::collection::vec(arb_event(), 1..30),
        policy in arb_policy(),
    ) {
        let context = test_context(policy);
        let mut state = ThreadState::new("test-thread");
        let mut seen_ids: HashSet<String> = HashSet::new();

        for event in events {
            let Ok(result) = transition(&state, &context, event) else { continue };
            check_record_invariants(&result.new_state)?;
            check_history(&state, &result.new_state, &context)?;
            check_tool_results_paired(&result.new_state)?;

            for message in &result.new_state.messages {
                if !state.messages.iter().any(|m| m.id == message.id) {
                    prop_assert!(seen_ids.insert(message.id.clone()), "message id reused");
                }
            }
            state = result.new_state;
        }
    }
}
