//! Confirmation gate
//!
//! Calls from one model response are presented strictly one at a time.
//! Nothing reaches the executor for a confirmation-requiring call unless
//! the user approved that exact call.

use super::transition::TransitionResult;
use super::{ConvContext, ConvState, Effect};
use crate::state_machine::state::ToolCall;
use crate::transcript::{ApprovalDecision, InvocationUpdate, ToolResult};

/// Prefix for the cancellation text of an expired confirmation
pub const EXPIRED_PREFIX: &str = "确认已超时，";

/// Why a decision left the conversation untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Nothing is waiting for a decision
    NoPendingConfirmation,
    /// A different call is the one presented
    NotCurrent,
    /// The call was approved and is already running
    AlreadyDecided,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            IgnoreReason::NoPendingConfirmation => "no_pending_confirmation",
            IgnoreReason::NotCurrent => "not_current",
            IgnoreReason::AlreadyDecided => "already_decided",
        }
    }
}

/// Present `call`, or run it straight away if it needs no confirmation
pub fn begin(
    context: &ConvContext,
    turn_id: String,
    call: ToolCall,
    remaining: Vec<ToolCall>,
    step: u32,
) -> TransitionResult {
    if !call.requires_confirmation {
        return TransitionResult::new(ConvState::ToolExecuting {
            turn_id,
            current: call.clone(),
            remaining,
            step,
        })
        .with_effect(Effect::PersistState)
        .with_effect(Effect::execute_tool(call));
    }

    let present = Effect::update_invocation(&turn_id, &call.id, InvocationUpdate::Present);
    let notify = Effect::notify_confirmation_required(&call);
    let expiry = context
        .confirmation_timeout
        .map(|after| Effect::ScheduleConfirmationTimeout {
            tool_call_id: call.id.clone(),
            after,
        });

    TransitionResult::new(ConvState::AwaitingConfirmation {
        turn_id,
        current: call,
        remaining,
        step,
    })
    .with_effect(present)
    .with_effect(Effect::PersistState)
    .with_effect(notify)
    .with_effects(expiry)
}

/// Record a denial (or expiry) and resolve with the cancellation text.
/// The executor is never involved.
pub fn decline(
    context: &ConvContext,
    turn_id: &str,
    call: &ToolCall,
    remaining: &[ToolCall],
    step: u32,
    expired: bool,
) -> TransitionResult {
    let message = if expired {
        format!("{EXPIRED_PREFIX}{}", call.cancellation_message)
    } else {
        call.cancellation_message.clone()
    };

    let effects = [
        Effect::update_invocation(
            turn_id,
            &call.id,
            InvocationUpdate::Decide(ApprovalDecision::Denied),
        ),
        Effect::update_invocation(
            turn_id,
            &call.id,
            InvocationUpdate::Resolve(ToolResult::cancelled(&call.id, message)),
        ),
    ];

    let next = advance(context, turn_id, remaining, step);
    TransitionResult::new(next.new_state)
        .with_effects(effects)
        .with_effects(next.effects)
}

/// Move past a resolved call: present the next one, ask the model again,
/// or finish the exchange
pub fn advance(
    context: &ConvContext,
    turn_id: &str,
    remaining: &[ToolCall],
    step: u32,
) -> TransitionResult {
    if let Some((next, rest)) = remaining.split_first() {
        return begin(context, turn_id.to_string(), next.clone(), rest.to_vec(), step);
    }

    if step < context.max_steps {
        return TransitionResult::new(ConvState::LlmRequesting {
            attempt: 1,
            step: step + 1,
        })
        .with_effect(Effect::PersistState)
        .with_effect(Effect::RequestLlm);
    }

    TransitionResult::new(ConvState::Idle)
        .with_effect(Effect::PersistState)
        .with_effect(Effect::notify_agent_done())
}

/// Decide whether a decision for `tool_call_id` applies in `state`
pub fn check_decision(state: &ConvState, tool_call_id: &str) -> Result<(), IgnoreReason> {
    match state {
        ConvState::AwaitingConfirmation { current, .. } if current.id == tool_call_id => Ok(()),
        ConvState::AwaitingConfirmation { .. } => Err(IgnoreReason::NotCurrent),
        ConvState::ToolExecuting { current, .. } if current.id == tool_call_id => {
            Err(IgnoreReason::AlreadyDecided)
        }
        _ => Err(IgnoreReason::NoPendingConfirmation),
    }
}
