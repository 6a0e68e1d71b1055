//! Conversation transcript model
//!
//! Turns, their parts, and the lifecycle of a tool invocation from the
//! moment the model asks for it until a result (or cancellation notice)
//! is attached. Invocations only ever move forward:
//! `pending-call -> awaiting-confirmation -> resolved`, or straight from
//! `pending-call` to `resolved` for tools that need no approval.

mod view;

pub use view::PartView;

use crate::state_machine::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Turns
// ============================================================================

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A turn that has not been stored yet. The store stamps `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub parts: Vec<Part>,
}

impl NewTurn {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            role: Role::User,
            parts: vec![Part::text(text.clone())],
            content: text,
        }
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: text.into(),
            parts,
        }
    }

    pub fn into_turn(self, created_at: DateTime<Utc>) -> Turn {
        Turn {
            id: self.id,
            role: self.role,
            content: self.content,
            parts: self.parts,
            created_at,
        }
    }
}

/// One entry in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub parts: Vec<Part>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolInvocation(invocation) => Some(invocation),
            _ => None,
        })
    }

    pub fn invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts.iter_mut().find_map(|part| match part {
            Part::ToolInvocation(invocation) if invocation.tool_call_id == tool_call_id => {
                Some(invocation)
            }
            _ => None,
        })
    }
}

/// True while any invocation in the transcript is waiting on the user
pub fn has_pending_confirmation(turns: &[Turn]) -> bool {
    turns
        .iter()
        .flat_map(Turn::invocations)
        .any(|invocation| invocation.state == InvocationState::AwaitingConfirmation)
}

// ============================================================================
// Parts
// ============================================================================

/// Content within a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        value: String,
    },
    ToolInvocation(ToolInvocation),
    /// Inline error, either a transport failure or a tool call that never
    /// made it past validation
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejected_call: Option<RejectedToolCall>,
    },
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Part::Text {
            value: value.into(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Part::Error {
            kind,
            message: message.into(),
            rejected_call: None,
        }
    }

    pub fn rejected(call: RejectedToolCall) -> Self {
        Part::Error {
            kind: ErrorKind::SchemaValidation,
            message: call.reason.clone(),
            rejected_call: Some(call),
        }
    }
}

/// A tool call the registry refused before it reached the confirmation gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub reason: String,
}

/// Error classification shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimit,
    Network,
    InvalidRequest,
    ServerError,
    SchemaValidation,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::ServerError
        )
    }
}

// ============================================================================
// Tool invocations
// ============================================================================

/// Where an invocation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationState {
    PendingCall,
    AwaitingConfirmation,
    Resolved,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationState::PendingCall => write!(f, "pending-call"),
            InvocationState::AwaitingConfirmation => write!(f, "awaiting-confirmation"),
            InvocationState::Resolved => write!(f, "resolved"),
        }
    }
}

/// The user's answer to a confirmation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

impl ApprovalDecision {
    /// Sentinel strings older clients sent in place of a decision
    pub const LEGACY_APPROVED: &'static str = "Yes, confirmed.";
    pub const LEGACY_DENIED: &'static str = "No, denied.";

    /// Parse a raw decision. Anything that is not clearly an approval or a
    /// denial is `None` and leaves the invocation undecided.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed == Self::LEGACY_APPROVED || trimmed.eq_ignore_ascii_case("approved") {
            Some(ApprovalDecision::Approved)
        } else if trimmed == Self::LEGACY_DENIED || trimmed.eq_ignore_ascii_case("denied") {
            Some(ApprovalDecision::Denied)
        } else {
            None
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Result attached to a resolved invocation, keyed by `tool_call_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub outcome: ToolOutcome,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_data: Option<Value>,
}

impl ToolResult {
    pub fn completed(
        tool_call_id: impl Into<String>,
        output: impl Into<String>,
        display_data: Option<Value>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Completed,
            output: output.into(),
            display_data,
        }
    }

    pub fn cancelled(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Cancelled,
            output: message.into(),
            display_data: None,
        }
    }

    pub fn failed(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            outcome: ToolOutcome::Failed,
            output: message.into(),
            display_data: None,
        }
    }

    /// Whether the model should see this result as an error
    pub fn is_error(&self) -> bool {
        self.outcome == ToolOutcome::Failed
    }
}

/// A model-requested tool call as it appears in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Human-readable tool name for the confirmation panel
    pub description: String,
    pub args: Value,
    pub requires_confirmation: bool,
    pub state: InvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

/// A forward-only change to an invocation
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationUpdate {
    Present,
    Decide(ApprovalDecision),
    Resolve(ToolResult),
}

impl InvocationUpdate {
    fn action(&self) -> &'static str {
        match self {
            InvocationUpdate::Present => "present",
            InvocationUpdate::Decide(_) => "decide",
            InvocationUpdate::Resolve(_) => "resolve",
        }
    }
}

impl ToolInvocation {
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            description: call.display_name.clone(),
            args: call.input.clone(),
            requires_confirmation: call.requires_confirmation,
            state: InvocationState::PendingCall,
            decision: None,
            result: None,
        }
    }

    /// Approved but not yet resolved
    pub fn is_executing(&self) -> bool {
        match self.state {
            InvocationState::PendingCall => !self.requires_confirmation,
            InvocationState::AwaitingConfirmation => {
                self.decision == Some(ApprovalDecision::Approved)
            }
            InvocationState::Resolved => false,
        }
    }

    pub fn apply(&mut self, update: InvocationUpdate) -> Result<(), TranscriptError> {
        let allowed = match &update {
            InvocationUpdate::Present => {
                self.state == InvocationState::PendingCall && self.requires_confirmation
            }
            InvocationUpdate::Decide(_) => {
                self.state == InvocationState::AwaitingConfirmation && self.decision.is_none()
            }
            InvocationUpdate::Resolve(result) => {
                if result.tool_call_id != self.tool_call_id {
                    return Err(TranscriptError::ResultMismatch {
                        expected: self.tool_call_id.clone(),
                        got: result.tool_call_id.clone(),
                    });
                }
                match self.state {
                    InvocationState::PendingCall => !self.requires_confirmation,
                    InvocationState::AwaitingConfirmation => self.decision.is_some(),
                    InvocationState::Resolved => false,
                }
            }
        };

        if !allowed {
            return Err(TranscriptError::InvalidInvocationTransition {
                tool_call_id: self.tool_call_id.clone(),
                from: self.state,
                action: update.action(),
            });
        }

        match update {
            InvocationUpdate::Present => self.state = InvocationState::AwaitingConfirmation,
            InvocationUpdate::Decide(decision) => self.decision = Some(decision),
            InvocationUpdate::Resolve(result) => {
                self.state = InvocationState::Resolved;
                self.result = Some(result);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum TranscriptError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Conversation already exists: {0}")]
    ConversationExists(String),
    #[error("Turn not found: {0}")]
    TurnNotFound(String),
    #[error("Turn already exists: {0}")]
    TurnExists(String),
    #[error("Tool invocation not found: {0}")]
    InvocationNotFound(String),
    #[error("Cannot {action} tool invocation {tool_call_id} from state {from}")]
    InvalidInvocationTransition {
        tool_call_id: String,
        from: InvocationState,
        action: &'static str,
    },
    #[error("Result for {got} cannot resolve invocation {expected}")]
    ResultMismatch { expected: String, got: String },
}
