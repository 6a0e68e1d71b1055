//! API request and response types

use crate::llm::ModelInfo;
use crate::store::Conversation;
use crate::transcript::{PartView, Turn};
use serde::{Deserialize, Serialize};

/// Request to create a new conversation
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Falls back to the registry's default model
    #[serde(default)]
    pub model: Option<String>,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    /// Client-generated id for the user turn
    #[serde(default)]
    pub message_id: Option<String>,
}

/// The user's answer to a presented tool call
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub tool_call_id: String,
    /// `approved` / `denied`, or the legacy sentinel strings
    pub decision: String,
}

/// Response with a list of conversations
#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
}

/// Response with a single conversation
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

/// A turn together with the panels clients draw for its parts
#[derive(Debug, Serialize)]
pub struct TurnView {
    #[serde(flatten)]
    pub turn: Turn,
    pub views: Vec<PartView>,
}

impl From<Turn> for TurnView {
    fn from(turn: Turn) -> Self {
        let views = turn.parts.iter().map(PartView::render).collect();
        Self { turn, views }
    }
}

/// Response with conversation and turns
#[derive(Debug, Serialize)]
pub struct ConversationDetailResponse {
    pub conversation: Conversation,
    pub turns: Vec<TurnView>,
    pub agent_working: bool,
    pub has_pending_confirmation: bool,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub queued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Delivered to the conversation
    Queued,
    /// Not clearly an approval or a denial; the call stays pending
    Undecided,
    /// The call is not the one awaiting a decision
    Ignored,
}

/// Response for a decision
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub status: DecisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl DecisionResponse {
    pub fn new(status: DecisionStatus) -> Self {
        Self {
            status,
            reason: None,
        }
    }

    pub fn ignored(reason: &'static str) -> Self {
        Self {
            status: DecisionStatus::Ignored,
            reason: Some(reason),
        }
    }
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
