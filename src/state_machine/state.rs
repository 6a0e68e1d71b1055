//! Conversation state types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

// ============================================================================
// Tool Call - a validated model request plus everything needed to gate it
// ============================================================================

/// A tool call from the LLM that passed argument validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Human-readable tool name for the confirmation panel
    pub display_name: String,
    /// Normalized arguments
    pub input: Value,
    pub requires_confirmation: bool,
    /// Result text synthesized when the user declines
    pub cancellation_message: String,
    /// Result text when an approved run fails
    pub failure_message: String,
}

// ============================================================================
// Conversation State
// ============================================================================

/// Conversation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for user input, no pending operations
    #[default]
    Idle,

    /// LLM request in flight, with retry tracking
    LlmRequesting {
        attempt: u32,
        /// Model round within the current user exchange, starting at 1
        step: u32,
    },

    /// One invocation is presented and waiting for the user
    AwaitingConfirmation {
        /// Assistant turn holding the invocations
        turn_id: String,
        current: ToolCall,
        /// Calls from the same response, presented after `current`
        remaining: Vec<ToolCall>,
        step: u32,
    },

    /// An approved (or confirmation-free) call is running
    ToolExecuting {
        turn_id: String,
        current: ToolCall,
        remaining: Vec<ToolCall>,
        step: u32,
    },
}

impl ConvState {
    /// Check if agent is currently working
    pub fn is_working(&self) -> bool {
        !matches!(self, ConvState::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::LlmRequesting { .. } => "llm_requesting",
            ConvState::AwaitingConfirmation { .. } => "awaiting_confirmation",
            ConvState::ToolExecuting { .. } => "tool_executing",
        }
    }

    /// The call currently presented for confirmation, if any
    pub fn awaiting_call(&self) -> Option<&ToolCall> {
        match self {
            ConvState::AwaitingConfirmation { current, .. } => Some(current),
            _ => None,
        }
    }
}

/// Context for a conversation (immutable configuration)
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub conversation_id: String,
    pub model_id: String,
    /// Model rounds allowed per user message; results of the last round
    /// are not sent back to the model
    pub max_steps: u32,
    /// Pending confirmations expire after this long. `None` waits forever.
    pub confirmation_timeout: Option<Duration>,
}

impl ConvContext {
    pub fn new(conversation_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            model_id: model_id.into(),
            max_steps: 1,
            confirmation_timeout: None,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.confirmation_timeout = timeout;
        self
    }
}
