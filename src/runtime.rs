//! Runtime for executing conversations
//!
//! One actor task per conversation consumes events sequentially; clients
//! observe it through a broadcast channel and a watch on its state.

mod executor;
pub mod traits;

#[cfg(test)]
mod testing;

pub use executor::{ConversationRuntime, RuntimeChannels};
pub use traits::RegistryLlmClient;

use crate::config::AppConfig;
use crate::llm::ModelRegistry;
use crate::state_machine::{ConvContext, ConvState, Event};
use crate::store::{Conversation, MemoryStore};
use crate::tools::ToolRegistry;
use crate::transcript::{Part, PartView, ToolResult, Turn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime =
    ConversationRuntime<MemoryStore, RegistryLlmClient, Arc<ToolRegistry>>;

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    store: MemoryStore,
    llm_registry: Arc<ModelRegistry>,
    tools: Arc<ToolRegistry>,
    config: AppConfig,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
    shutdown: CancellationToken,
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    pub state_rx: watch::Receiver<ConvState>,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        conversation: Conversation,
        turns: Vec<Turn>,
        has_pending_confirmation: bool,
    },
    TurnAppended {
        turn: Turn,
        views: Vec<PartView>,
    },
    /// An invocation moved forward in place
    PartUpdated {
        turn_id: String,
        part: Part,
        view: PartView,
    },
    ToolResult {
        tool_call_id: String,
        result: ToolResult,
    },
    StateChange {
        state: ConvState,
    },
    ConfirmationRequired {
        request: Value,
    },
    DecisionIgnored {
        notice: Value,
    },
    AgentDone,
    Error {
        message: String,
    },
}

impl RuntimeManager {
    pub fn new(
        store: MemoryStore,
        llm_registry: Arc<ModelRegistry>,
        tools: Arc<ToolRegistry>,
        config: AppConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            llm_registry,
            tools,
            config,
            runtimes: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Get or create a runtime for a conversation
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<ConversationHandle, String> {
        // Check if already running
        if let Some(handle) = self.runtimes.read().await.get(conversation_id) {
            return Ok(handle.clone());
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(conversation_id) {
            return Ok(handle.clone());
        }

        let conv = self
            .store
            .get_conversation(conversation_id)
            .map_err(|e| e.to_string())?;

        let context = ConvContext::new(&conv.id, &conv.model)
            .with_max_steps(self.config.max_steps)
            .with_confirmation_timeout(self.config.confirmation_timeout);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (state_tx, state_rx) = watch::channel(conv.state.clone());

        let runtime: ProductionRuntime = ConversationRuntime::new(
            context,
            conv.state,
            self.store.clone(),
            RegistryLlmClient::new(self.llm_registry.clone(), conv.model),
            self.tools.clone(),
            RuntimeChannels {
                event_rx,
                event_tx: event_tx.clone(),
                broadcast_tx: broadcast_tx.clone(),
                state_tx,
            },
        )
        .with_system_prompt(&self.config.system_prompt)
        .with_shutdown(self.shutdown.child_token());

        // Start runtime in background
        let conv_id = conversation_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(conv_id = %conv_id, "Conversation runtime finished");
        });

        let handle = ConversationHandle {
            event_tx,
            broadcast_tx,
            state_rx,
        };
        runtimes.insert(conversation_id.to_string(), handle.clone());

        Ok(handle)
    }

    /// Send an event to a conversation
    pub async fn send_event(&self, conversation_id: &str, event: Event) -> Result<(), String> {
        let handle = self.get_or_create(conversation_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Subscribe to conversation updates
    pub async fn subscribe(
        &self,
        conversation_id: &str,
    ) -> Result<broadcast::Receiver<SseEvent>, String> {
        let handle = self.get_or_create(conversation_id).await?;
        Ok(handle.broadcast_tx.subscribe())
    }

    /// Latest state published by the conversation's runtime
    pub async fn current_state(&self, conversation_id: &str) -> Result<ConvState, String> {
        let handle = self.get_or_create(conversation_id).await?;
        let state = handle.state_rx.borrow().clone();
        Ok(state)
    }

    /// Get the conversation store
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn model_registry(&self) -> &ModelRegistry {
        &self.llm_registry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Stop every conversation runtime and interrupt running tools
    pub fn shutdown(&self) {
        tracing::info!("Shutting down conversation runtimes");
        self.shutdown.cancel();
    }
}
