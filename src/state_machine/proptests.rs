//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::state::*;
use super::transition::*;
use super::*;
use crate::transcript::{ApprovalDecision, ErrorKind, InvocationUpdate, ToolResult};
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> ConvContext {
    ConvContext::new("test-conv", "deepseek-chat")
}

// Small id pool so decisions and completions regularly hit the current call
fn arb_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("a"), Just("b"), Just("c")].prop_map(String::from)
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    (arb_id(), any::<bool>()).prop_map(|(id, requires_confirmation)| ToolCall {
        id,
        name: "weather".to_string(),
        display_name: "获取天气信息".to_string(),
        input: serde_json::json!({"location": "北京"}),
        requires_confirmation,
        cancellation_message: "用户取消了天气查询".to_string(),
        failure_message: "获取天气信息失败，请稍后重试。".to_string(),
    })
}

fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
    prop_oneof![
        Just(ErrorKind::Network),
        Just(ErrorKind::RateLimit),
        Just(ErrorKind::ServerError),
        Just(ErrorKind::Auth),
        Just(ErrorKind::InvalidRequest),
        Just(ErrorKind::Unknown),
    ]
}

fn arb_decision() -> impl Strategy<Value = ApprovalDecision> {
    prop_oneof![Just(ApprovalDecision::Approved), Just(ApprovalDecision::Denied)]
}

fn arb_llm_requesting_state() -> impl Strategy<Value = ConvState> {
    (1u32..=MAX_RETRY_ATTEMPTS, 1u32..3)
        .prop_map(|(attempt, step)| ConvState::LlmRequesting { attempt, step })
}

fn arb_awaiting_state() -> impl Strategy<Value = ConvState> {
    (
        arb_tool_call(),
        proptest::collection::vec(arb_tool_call(), 0..3),
        1u32..3,
    )
        .prop_map(|(mut current, remaining, step)| {
            current.requires_confirmation = true;
            ConvState::AwaitingConfirmation {
                turn_id: "turn".to_string(),
                current,
                remaining,
                step,
            }
        })
}

fn arb_tool_executing_state() -> impl Strategy<Value = ConvState> {
    (
        arb_tool_call(),
        proptest::collection::vec(arb_tool_call(), 0..3),
        1u32..3,
    )
        .prop_map(|(current, remaining, step)| ConvState::ToolExecuting {
            turn_id: "turn".to_string(),
            current,
            remaining,
            step,
        })
}

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::Idle),
        arb_llm_requesting_state(),
        arb_awaiting_state(),
        arb_tool_executing_state(),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(|text| Event::UserMessage {
            text,
            message_id: "msg".to_string(),
        }),
        (
            "[a-z ]{0,20}",
            proptest::collection::vec(arb_tool_call(), 0..3)
        )
            .prop_map(|(text, tool_calls)| Event::LlmResponse {
                message_id: "turn".to_string(),
                text,
                tool_calls,
                rejected: vec![],
            }),
        ("[a-z ]{1,20}", arb_error_kind()).prop_map(|(message, error_kind)| Event::LlmError {
            message,
            error_kind,
            message_id: "err".to_string(),
        }),
        (1u32..5).prop_map(|attempt| Event::RetryTimeout { attempt }),
        (arb_id(), arb_decision()).prop_map(|(tool_call_id, decision)| Event::UserDecision {
            tool_call_id,
            decision,
        }),
        arb_id().prop_map(|tool_call_id| Event::ConfirmationExpired { tool_call_id }),
        arb_id().prop_map(|id| Event::ToolComplete {
            tool_call_id: id.clone(),
            result: ToolResult::completed(id, "done", None),
        }),
    ]
}

fn executed_ids(effects: &[Effect]) -> Vec<&ToolCall> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::ExecuteTool { tool } => Some(tool),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// A confirmation-requiring call only reaches the executor through an
    /// approval of that exact call
    #[test]
    fn prop_no_execution_without_approval(state in arb_state(), event in arb_event()) {
        let approved_id = match &event {
            Event::UserDecision { tool_call_id, decision: ApprovalDecision::Approved } => {
                Some(tool_call_id.clone())
            }
            _ => None,
        };
        if let Ok(result) = transition(&state, &test_context(), event) {
            for tool in executed_ids(&result.effects) {
                if tool.requires_confirmation {
                    prop_assert_eq!(Some(&tool.id), approved_id.as_ref());
                }
                let in_executing = matches!(result.new_state, ConvState::ToolExecuting { .. });
                prop_assert!(in_executing);
            }
        }
    }

    /// Denials and expiries never run a tool for the declined call
    #[test]
    fn prop_denial_never_executes(state in arb_awaiting_state(), expire in any::<bool>()) {
        let current = state.awaiting_call().cloned().unwrap();
        let event = if expire {
            Event::ConfirmationExpired { tool_call_id: current.id.clone() }
        } else {
            Event::UserDecision {
                tool_call_id: current.id.clone(),
                decision: ApprovalDecision::Denied,
            }
        };
        let result = transition(&state, &test_context(), event).unwrap();

        let resolved = result.effects.iter().any(|e| matches!(
            e,
            Effect::UpdateInvocation { tool_call_id, update: InvocationUpdate::Resolve(r), .. }
                if *tool_call_id == current.id && r.output.ends_with(&current.cancellation_message)
        ));
        prop_assert!(resolved);

        // Executions after the denial may only belong to later calls
        // that skip confirmation
        for tool in executed_ids(&result.effects) {
            prop_assert!(!tool.requires_confirmation);
        }
    }

    /// Replaying a decision after it was applied changes nothing
    #[test]
    fn prop_double_decision_is_idempotent(
        state in arb_awaiting_state(),
        first in arb_decision(),
        second in arb_decision(),
    ) {
        let id = state.awaiting_call().map(|c| c.id.clone()).unwrap();
        let once = transition(&state, &test_context(), Event::UserDecision {
            tool_call_id: id.clone(),
            decision: first,
        }).unwrap();

        // A later call with the same id may legitimately be presented next
        prop_assume!(once.new_state.awaiting_call().map(|c| c.id.as_str()) != Some(id.as_str()));

        let twice = transition(&once.new_state, &test_context(), Event::UserDecision {
            tool_call_id: id.clone(),
            decision: second,
        }).unwrap();

        prop_assert_eq!(&twice.new_state, &once.new_state);
        prop_assert!(executed_ids(&twice.effects).is_empty());
        let only_notices = twice
            .effects
            .iter()
            .all(|e| matches!(e, Effect::NotifyClient { .. }));
        prop_assert!(only_notices);
    }

    /// New user input is refused whenever a confirmation is outstanding
    #[test]
    fn prop_user_message_rejected_while_pending(state in arb_awaiting_state(), text in "[a-z]{1,10}") {
        let result = transition(&state, &test_context(), Event::UserMessage {
            text,
            message_id: "m".to_string(),
        });
        prop_assert_eq!(result.unwrap_err(), TransitionError::ConfirmationPending);
    }

    /// The transition function is pure
    #[test]
    fn prop_transition_is_deterministic(state in arb_state(), event in arb_event()) {
        let a = transition(&state, &test_context(), event.clone());
        let b = transition(&state, &test_context(), event);
        prop_assert_eq!(a, b);
    }

    /// RequestLlm only ever leaves the machine in LlmRequesting
    #[test]
    fn prop_request_llm_only_while_requesting(state in arb_state(), event in arb_event()) {
        if let Ok(result) = transition(&state, &test_context(), event) {
            if result.effects.contains(&Effect::RequestLlm) {
                let requesting = matches!(result.new_state, ConvState::LlmRequesting { .. });
                prop_assert!(requesting);
            }
        }
    }

    /// Retry attempts never exceed the budget
    #[test]
    fn prop_retry_attempts_bounded(
        events in proptest::collection::vec(arb_error_kind(), 1..10),
    ) {
        let mut state = ConvState::LlmRequesting { attempt: 1, step: 1 };
        for error_kind in events {
            let Ok(result) = transition(&state, &test_context(), Event::LlmError {
                message: "boom".to_string(),
                error_kind,
                message_id: "e".to_string(),
            }) else {
                break;
            };
            state = result.new_state;
            if let ConvState::LlmRequesting { attempt, .. } = state {
                prop_assert!(attempt <= MAX_RETRY_ATTEMPTS);
            }
        }
    }

    /// Expiry timers are only scheduled when configured
    #[test]
    fn prop_expiry_follows_context(state in arb_state(), event in arb_event(), secs in proptest::option::of(1u64..600)) {
        let ctx = test_context().with_confirmation_timeout(secs.map(Duration::from_secs));
        if let Ok(result) = transition(&state, &ctx, event) {
            let scheduled = result.effects.iter().any(|e| matches!(e, Effect::ScheduleConfirmationTimeout { .. }));
            if secs.is_none() {
                prop_assert!(!scheduled);
            }
            if scheduled {
                let awaiting = matches!(result.new_state, ConvState::AwaitingConfirmation { .. });
                prop_assert!(awaiting);
            }
        }
    }

    /// Random sessions never hold more than one call awaiting confirmation
    /// and every executed gated call was approved first
    #[test]
    fn prop_random_sessions_keep_gate(events in proptest::collection::vec(arb_event(), 1..40)) {
        let ctx = test_context().with_max_steps(2);
        let mut state = ConvState::Idle;
        for event in events {
            let approved = match &event {
                Event::UserDecision { tool_call_id, decision: ApprovalDecision::Approved } => {
                    state.awaiting_call().filter(|c| &c.id == tool_call_id).map(|c| c.id.clone())
                }
                _ => None,
            };
            if let Ok(result) = transition(&state, &ctx, event) {
                for tool in executed_ids(&result.effects) {
                    if tool.requires_confirmation {
                        prop_assert_eq!(Some(&tool.id), approved.as_ref());
                    }
                }
                state = result.new_state;
            }
        }
    }
}
