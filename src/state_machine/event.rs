//! Events that can occur in a conversation

use crate::state_machine::state::ToolCall;
use crate::transcript::{ApprovalDecision, ErrorKind, RejectedToolCall, ToolResult};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
        message_id: String,
    },
    UserDecision {
        tool_call_id: String,
        decision: ApprovalDecision,
    },

    // LLM events
    LlmResponse {
        /// Id for the assistant turn
        message_id: String,
        text: String,
        /// Calls that passed validation, in model order
        tool_calls: Vec<ToolCall>,
        /// Calls that failed validation
        rejected: Vec<RejectedToolCall>,
    },
    LlmError {
        message: String,
        error_kind: ErrorKind,
        /// Id for the error turn if the failure is final
        message_id: String,
    },
    RetryTimeout {
        attempt: u32,
    },

    // Timer events
    ConfirmationExpired {
        tool_call_id: String,
    },

    // Tool events
    ToolComplete {
        tool_call_id: String,
        result: ToolResult,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserMessage { .. } => "user_message",
            Event::UserDecision { .. } => "user_decision",
            Event::LlmResponse { .. } => "llm_response",
            Event::LlmError { .. } => "llm_error",
            Event::RetryTimeout { .. } => "retry_timeout",
            Event::ConfirmationExpired { .. } => "confirmation_expired",
            Event::ToolComplete { .. } => "tool_complete",
        }
    }
}
