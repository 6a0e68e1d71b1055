//! Pure state transition function

use super::gate::{self, IgnoreReason};
use super::{ConvContext, ConvState, Effect, Event};
use crate::transcript::{ApprovalDecision, InvocationUpdate, NewTurn, Part, ToolInvocation};
use std::time::Duration;
use thiserror::Error;

pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Result of a state transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
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
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Agent is busy, cannot accept message")]
    AgentBusy,
    #[error("A tool call is waiting for confirmation")]
    ConfirmationPending,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User Message Handling
        // ============================================================

        // Idle + UserMessage -> LlmRequesting
        (ConvState::Idle, Event::UserMessage { text, message_id }) => Ok(TransitionResult::new(
            ConvState::LlmRequesting {
                attempt: 1,
                step: 1,
            },
        )
        .with_effect(Effect::PersistTurn {
            turn: NewTurn::user(message_id, text),
        })
        .with_effect(Effect::PersistState)
        .with_effect(Effect::RequestLlm)),

        (ConvState::AwaitingConfirmation { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::ConfirmationPending)
        }

        (
            ConvState::LlmRequesting { .. } | ConvState::ToolExecuting { .. },
            Event::UserMessage { .. },
        ) => Err(TransitionError::AgentBusy),

        // ============================================================
        // LLM Response Processing
        // ============================================================
        (
            ConvState::LlmRequesting { step, .. },
            Event::LlmResponse {
                message_id,
                text,
                tool_calls,
                rejected,
            },
        ) => {
            let mut parts = Vec::new();
            if !text.trim().is_empty() {
                parts.push(Part::text(text.clone()));
            }
            parts.extend(
                tool_calls
                    .iter()
                    .map(|call| Part::ToolInvocation(ToolInvocation::from_call(call))),
            );
            parts.extend(rejected.into_iter().map(Part::rejected));

            let persist = Effect::PersistTurn {
                turn: NewTurn::assistant(message_id.clone(), text, parts),
            };

            let mut calls = tool_calls.into_iter();
            match calls.next() {
                // No valid tools -> Idle
                None => Ok(TransitionResult::new(ConvState::Idle)
                    .with_effect(persist)
                    .with_effect(Effect::PersistState)
                    .with_effect(Effect::notify_agent_done())),
                Some(first) => {
                    let gated = gate::begin(context, message_id, first, calls.collect(), *step);
                    Ok(TransitionResult::new(gated.new_state)
                        .with_effect(persist)
                        .with_effects(gated.effects))
                }
            }
        }

        // ============================================================
        // Error Handling and Retry
        // ============================================================

        // LlmRequesting + LlmError (retryable) -> LlmRequesting with incremented attempt
        (ConvState::LlmRequesting { attempt, step }, Event::LlmError { error_kind, .. })
            if error_kind.is_retryable() && *attempt < MAX_RETRY_ATTEMPTS =>
        {
            let new_attempt = attempt + 1;
            Ok(TransitionResult::new(ConvState::LlmRequesting {
                attempt: new_attempt,
                step: *step,
            })
            .with_effect(Effect::PersistState)
            .with_effect(Effect::ScheduleRetry {
                delay: retry_delay(new_attempt),
                attempt: new_attempt,
            }))
        }

        // LlmRequesting + LlmError (non-retryable or exhausted) -> Idle with an error turn
        (
            ConvState::LlmRequesting { attempt, .. },
            Event::LlmError {
                message,
                error_kind,
                message_id,
            },
        ) => {
            let message = if error_kind.is_retryable() {
                format!("Failed after {attempt} attempts: {message}")
            } else {
                message
            };
            Ok(TransitionResult::new(ConvState::Idle)
                .with_effect(Effect::PersistTurn {
                    turn: NewTurn::assistant(
                        message_id,
                        String::new(),
                        vec![Part::error(error_kind, message)],
                    ),
                })
                .with_effect(Effect::PersistState)
                .with_effect(Effect::notify_agent_done()))
        }

        // RetryTimeout -> Make LLM request
        (ConvState::LlmRequesting { attempt, .. }, Event::RetryTimeout { attempt: retry })
            if *attempt == retry =>
        {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::RequestLlm))
        }

        // ============================================================
        // Confirmation Gate
        // ============================================================
        (
            ConvState::AwaitingConfirmation {
                turn_id,
                current,
                remaining,
                step,
            },
            Event::UserDecision {
                tool_call_id,
                decision,
            },
        ) if tool_call_id == current.id => match decision {
            ApprovalDecision::Approved => Ok(TransitionResult::new(ConvState::ToolExecuting {
                turn_id: turn_id.clone(),
                current: current.clone(),
                remaining: remaining.clone(),
                step: *step,
            })
            .with_effect(Effect::update_invocation(
                turn_id,
                &current.id,
                InvocationUpdate::Decide(ApprovalDecision::Approved),
            ))
            .with_effect(Effect::PersistState)
            .with_effect(Effect::execute_tool(current.clone()))),
            ApprovalDecision::Denied => Ok(gate::decline(
                context, turn_id, current, remaining, *step, false,
            )),
        },

        (
            ConvState::AwaitingConfirmation {
                turn_id,
                current,
                remaining,
                step,
            },
            Event::ConfirmationExpired { tool_call_id },
        ) if tool_call_id == current.id => Ok(gate::decline(
            context, turn_id, current, remaining, *step, true,
        )),

        // Decisions that do not match the presented call change nothing
        (_, Event::UserDecision { tool_call_id, .. }) => {
            let reason = gate::check_decision(state, &tool_call_id)
                .err()
                .unwrap_or(IgnoreReason::NoPendingConfirmation);
            Ok(TransitionResult::new(state.clone())
                .with_effect(Effect::notify_decision_ignored(&tool_call_id, reason.as_str())))
        }

        // Timer for a confirmation that was already answered
        (_, Event::ConfirmationExpired { .. }) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Tool Execution
        // ============================================================
        (
            ConvState::ToolExecuting {
                turn_id,
                current,
                remaining,
                step,
            },
            Event::ToolComplete {
                tool_call_id,
                result,
            },
        ) if tool_call_id == current.id && result.tool_call_id == current.id => {
            let next = gate::advance(context, turn_id, remaining, *step);
            Ok(TransitionResult::new(next.new_state)
                .with_effect(Effect::update_invocation(
                    turn_id,
                    &current.id,
                    InvocationUpdate::Resolve(result),
                ))
                .with_effects(next.effects))
        }

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} on {}",
            state.name(),
            event.name()
        ))),
    }
}

fn retry_delay(attempt: u32) -> Duration {
    // Exponential backoff: 1s, 2s, 4s
    Duration::from_secs(1 << (attempt - 1))
}
