//! In-memory conversation store
//!
//! Conversations live for the lifetime of the process. Every mutation goes
//! through one mutex, so a turn and its invocations are never observed
//! half-updated.

use crate::state_machine::ConvState;
use crate::transcript::{InvocationUpdate, NewTurn, ToolInvocation, TranscriptError, Turn};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type StoreResult<T> = Result<T, TranscriptError>;

/// Conversation metadata
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub slug: String,
    pub model: String,
    pub state: ConvState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Check if the agent is currently working
    pub fn is_agent_working(&self) -> bool {
        self.state.is_working()
    }
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    turns: HashMap<String, Vec<Turn>>,
}

/// Thread-safe store handle
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every write completes before the guard drops, so a poisoned
        // lock still holds consistent data
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Conversation Operations ====================

    pub fn create_conversation(&self, id: &str, slug: &str, model: &str) -> StoreResult<Conversation> {
        let mut inner = self.lock();
        if inner.conversations.contains_key(id) {
            return Err(TranscriptError::ConversationExists(id.to_string()));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: id.to_string(),
            slug: slug.to_string(),
            model: model.to_string(),
            state: ConvState::Idle,
            created_at: now,
            updated_at: now,
        };
        inner
            .conversations
            .insert(id.to_string(), conversation.clone());
        inner.turns.insert(id.to_string(), Vec::new());
        Ok(conversation)
    }

    pub fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        self.lock()
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| TranscriptError::ConversationNotFound(id.to_string()))
    }

    /// All conversations, most recently updated first
    pub fn list_conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<_> = self.lock().conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        conversations
    }

    pub fn update_state(&self, id: &str, state: &ConvState) -> StoreResult<()> {
        let mut inner = self.lock();
        let conversation = inner
            .conversations
            .get_mut(id)
            .ok_or_else(|| TranscriptError::ConversationNotFound(id.to_string()))?;
        conversation.state = state.clone();
        conversation.updated_at = Utc::now();
        Ok(())
    }

    // ==================== Turn Operations ====================

    pub fn append_turn(&self, conv_id: &str, turn: NewTurn) -> StoreResult<Turn> {
        let mut inner = self.lock();
        let turns = inner
            .turns
            .get_mut(conv_id)
            .ok_or_else(|| TranscriptError::ConversationNotFound(conv_id.to_string()))?;
        if turns.iter().any(|t| t.id == turn.id) {
            return Err(TranscriptError::TurnExists(turn.id));
        }

        let now = Utc::now();
        let turn = turn.into_turn(now);
        turns.push(turn.clone());

        if let Some(conversation) = inner.conversations.get_mut(conv_id) {
            conversation.updated_at = now;
        }
        Ok(turn)
    }

    pub fn get_turns(&self, conv_id: &str) -> StoreResult<Vec<Turn>> {
        self.lock()
            .turns
            .get(conv_id)
            .cloned()
            .ok_or_else(|| TranscriptError::ConversationNotFound(conv_id.to_string()))
    }

    /// Whether a turn with this id was already stored. Chat retries reuse
    /// their message id.
    pub fn turn_exists(&self, conv_id: &str, turn_id: &str) -> bool {
        self.lock()
            .turns
            .get(conv_id)
            .is_some_and(|turns| turns.iter().any(|t| t.id == turn_id))
    }

    /// Apply a forward-only update to one invocation in place
    pub fn update_invocation(
        &self,
        conv_id: &str,
        turn_id: &str,
        tool_call_id: &str,
        update: InvocationUpdate,
    ) -> StoreResult<ToolInvocation> {
        let mut inner = self.lock();
        let turn = inner
            .turns
            .get_mut(conv_id)
            .ok_or_else(|| TranscriptError::ConversationNotFound(conv_id.to_string()))?
            .iter_mut()
            .find(|t| t.id == turn_id)
            .ok_or_else(|| TranscriptError::TurnNotFound(turn_id.to_string()))?;
        let invocation = turn
            .invocation_mut(tool_call_id)
            .ok_or_else(|| TranscriptError::InvocationNotFound(tool_call_id.to_string()))?;

        invocation.apply(update)?;
        Ok(invocation.clone())
    }
}
