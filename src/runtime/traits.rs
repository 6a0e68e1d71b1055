//! Trait abstractions for runtime I/O
//!
//! These traits let the executor run against mock implementations in tests.

use crate::llm::{LlmError, LlmRequest, LlmResponse, ModelRegistry, ToolDefinition};
use crate::state_machine::{ConvState, ToolCall};
use crate::store::MemoryStore;
use crate::tools::{ExecutionError, SchemaValidationError, ToolContext, ToolOutput, ToolRegistry};
use crate::transcript::{InvocationUpdate, NewTurn, ToolInvocation, Turn};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Storage for conversation turns
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Append a turn to the conversation
    async fn append_turn(&self, conv_id: &str, turn: NewTurn) -> Result<Turn, String>;

    /// Get all turns for a conversation, oldest first
    async fn get_turns(&self, conv_id: &str) -> Result<Vec<Turn>, String>;

    /// Move one invocation forward in place
    async fn update_invocation(
        &self,
        conv_id: &str,
        turn_id: &str,
        tool_call_id: &str,
        update: InvocationUpdate,
    ) -> Result<ToolInvocation, String>;
}

/// Storage for conversation state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn update_state(&self, conv_id: &str, state: &ConvState) -> Result<(), String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;
}

/// Validates and runs tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ExecutionError>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Validate a model request before it reaches the confirmation gate
    fn prepare(&self, id: &str, name: &str, input: &Value)
        -> Result<ToolCall, SchemaValidationError>;
}

/// Combined storage trait for convenience
pub trait Storage: TurnStore + StateStore {}
impl<T: TurnStore + StateStore> Storage for T {}

// ============================================================================
// Arc implementations for shared handles
// ============================================================================

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ExecutionError> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        (**self).definitions()
    }

    fn prepare(
        &self,
        id: &str,
        name: &str,
        input: &Value,
    ) -> Result<ToolCall, SchemaValidationError> {
        (**self).prepare(id, name, input)
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl TurnStore for MemoryStore {
    async fn append_turn(&self, conv_id: &str, turn: NewTurn) -> Result<Turn, String> {
        MemoryStore::append_turn(self, conv_id, turn).map_err(|e| e.to_string())
    }

    async fn get_turns(&self, conv_id: &str) -> Result<Vec<Turn>, String> {
        MemoryStore::get_turns(self, conv_id).map_err(|e| e.to_string())
    }

    async fn update_invocation(
        &self,
        conv_id: &str,
        turn_id: &str,
        tool_call_id: &str,
        update: InvocationUpdate,
    ) -> Result<ToolInvocation, String> {
        MemoryStore::update_invocation(self, conv_id, turn_id, tool_call_id, update)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn update_state(&self, conv_id: &str, state: &ConvState) -> Result<(), String> {
        MemoryStore::update_state(self, conv_id, state).map_err(|e| e.to_string())
    }
}

/// Adapter to use `ModelRegistry` as `LlmClient`
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let service = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| {
                LlmError::auth(format!(
                    "Model {} is not available; set DEEPSEEK_API_KEY",
                    self.model_id
                ))
            })?;

        service.complete(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ExecutionError> {
        ToolRegistry::execute(self, name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolRegistry::definitions(self)
    }

    fn prepare(
        &self,
        id: &str,
        name: &str,
        input: &Value,
    ) -> Result<ToolCall, SchemaValidationError> {
        ToolRegistry::prepare(self, id, name, input)
    }
}
