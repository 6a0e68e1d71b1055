//! Effects produced by state transitions

use crate::state_machine::state::ToolCall;
use crate::transcript::{InvocationUpdate, NewTurn};
use serde_json::{json, Value};
use std::time::Duration;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a turn to the transcript
    PersistTurn { turn: NewTurn },

    /// Move one invocation forward in place
    UpdateInvocation {
        turn_id: String,
        tool_call_id: String,
        update: InvocationUpdate,
    },

    /// Persist the new state
    PersistState,

    /// Make an LLM request
    RequestLlm,

    /// Execute a tool (spawns as background task)
    ExecuteTool { tool: ToolCall },

    /// Schedule a retry
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// Expire a presented confirmation after `after`
    ScheduleConfirmationTimeout { tool_call_id: String, after: Duration },

    /// Notify connected clients
    NotifyClient { event_type: String, data: Value },
}

impl Effect {
    pub fn update_invocation(
        turn_id: &str,
        tool_call_id: &str,
        update: InvocationUpdate,
    ) -> Self {
        Effect::UpdateInvocation {
            turn_id: turn_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            update,
        }
    }

    pub fn notify_agent_done() -> Self {
        Effect::NotifyClient {
            event_type: "agent_done".to_string(),
            data: Value::Null,
        }
    }

    pub fn notify_confirmation_required(tool: &ToolCall) -> Self {
        Effect::NotifyClient {
            event_type: "confirmation_required".to_string(),
            data: json!({
                "tool_call_id": tool.id,
                "tool_name": tool.name,
                "display_name": tool.display_name,
                "args": tool.input,
            }),
        }
    }

    pub fn notify_decision_ignored(tool_call_id: &str, reason: &str) -> Self {
        Effect::NotifyClient {
            event_type: "decision_ignored".to_string(),
            data: json!({
                "tool_call_id": tool_call_id,
                "reason": reason,
            }),
        }
    }

    pub fn execute_tool(tool: ToolCall) -> Self {
        Effect::ExecuteTool { tool }
    }
}
