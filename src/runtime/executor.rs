//! Conversation runtime executor

use super::traits::{LlmClient, Storage, ToolExecutor};
use super::SseEvent;

use crate::llm::{ContentBlock, LlmErrorKind, LlmMessage, LlmRequest, LlmResponse, SystemContent};
use crate::state_machine::{transition, ConvContext, ConvState, Effect, Event, ToolCall};
use crate::tools::ToolContext;
use crate::transcript::{
    ErrorKind, InvocationState, InvocationUpdate, NewTurn, Part, PartView, RejectedToolCall,
    Role, ToolResult, Turn,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const MAX_RESPONSE_TOKENS: u32 = 4096;

/// Channels a runtime owns for its lifetime
pub struct RuntimeChannels {
    pub event_rx: mpsc::Receiver<Event>,
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    pub state_tx: watch::Sender<ConvState>,
}

/// Generic conversation runtime that can work with any storage, LLM, and tool implementations
pub struct ConversationRuntime<S, L, T>
where
    S: Storage + Clone + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    context: ConvContext,
    state: ConvState,
    storage: S,
    llm_client: Arc<L>,
    tool_executor: Arc<T>,
    system_prompt: Arc<str>,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    state_tx: watch::Sender<ConvState>,
    /// Cancelled on server shutdown; running tools get a child token
    shutdown: CancellationToken,
}

impl<S, L, T> ConversationRuntime<S, L, T>
where
    S: Storage + Clone + 'static,
    L: LlmClient + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(
        context: ConvContext,
        state: ConvState,
        storage: S,
        llm_client: L,
        tool_executor: T,
        channels: RuntimeChannels,
    ) -> Self {
        Self {
            context,
            state,
            storage,
            llm_client: Arc::new(llm_client),
            tool_executor: Arc::new(tool_executor),
            system_prompt: Arc::from(crate::config::DEFAULT_SYSTEM_PROMPT),
            event_rx: channels.event_rx,
            event_tx: channels.event_tx,
            broadcast_tx: channels.broadcast_tx,
            state_tx: channels.state_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Arc::from(prompt);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn run(mut self) {
        tracing::info!(conv_id = %self.context.conversation_id, "Starting conversation runtime");

        // Process events in a loop - no recursion
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event).await {
                        tracing::error!(
                            conv_id = %self.context.conversation_id,
                            error = %e,
                            "Error handling event"
                        );
                        let _ = self.broadcast_tx.send(SseEvent::Error { message: e });
                    }
                }
                else => break,
            }
        }

        tracing::info!(conv_id = %self.context.conversation_id, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        let event_name = event.name();

        // Pure state transition
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(e) => {
                // Transition errors are user-facing (e.g., "agent is busy")
                tracing::warn!(
                    conv_id = %self.context.conversation_id,
                    state = self.state.name(),
                    event = event_name,
                    error = %e,
                    "Event rejected"
                );
                let _ = self.broadcast_tx.send(SseEvent::Error {
                    message: e.to_string(),
                });
                return Ok(());
            }
        };

        let previous = std::mem::replace(&mut self.state, result.new_state);
        if previous.name() != self.state.name() {
            tracing::debug!(
                conv_id = %self.context.conversation_id,
                from = previous.name(),
                to = self.state.name(),
                event = event_name,
                "State transition"
            );
        }
        let mut outcome = Ok(());
        for effect in result.effects {
            if let Err(e) = self.execute_effect(effect).await {
                self.recover(event_name, &e).await;
                outcome = Err(e);
                break;
            }
        }

        // Watchers see a state only once its turns are stored
        self.state_tx.send_replace(self.state.clone());
        outcome
    }

    /// An effect failed part way through. Drop back to Idle with an error
    /// turn so the stored state and the runtime agree again.
    async fn recover(&mut self, event_name: &str, error: &str) {
        let conv_id = self.context.conversation_id.clone();
        tracing::error!(
            conv_id = %conv_id,
            state = self.state.name(),
            event = event_name,
            error = %error,
            "Effect failed, returning to idle"
        );
        self.state = ConvState::Idle;

        let turn = NewTurn::assistant(
            new_id(),
            String::new(),
            vec![Part::error(ErrorKind::Unknown, error)],
        );
        match self.storage.append_turn(&conv_id, turn).await {
            Ok(turn) => {
                let views = turn.parts.iter().map(PartView::render).collect();
                let _ = self
                    .broadcast_tx
                    .send(SseEvent::TurnAppended { turn, views });
            }
            Err(e) => tracing::warn!(conv_id = %conv_id, error = %e, "Could not record error turn"),
        }

        if let Err(e) = self.storage.update_state(&conv_id, &self.state).await {
            tracing::warn!(conv_id = %conv_id, error = %e, "Could not reset state");
        }
        let _ = self.broadcast_tx.send(SseEvent::StateChange {
            state: self.state.clone(),
        });
        let _ = self.broadcast_tx.send(SseEvent::AgentDone);
    }

    /// Execute one effect. Slow work is spawned and reports back as an event.
    async fn execute_effect(&mut self, effect: Effect) -> Result<(), String> {
        let conv_id = self.context.conversation_id.clone();

        match effect {
            Effect::PersistTurn { turn } => {
                let turn = self.storage.append_turn(&conv_id, turn).await?;
                let views = turn.parts.iter().map(PartView::render).collect();
                let _ = self
                    .broadcast_tx
                    .send(SseEvent::TurnAppended { turn, views });
            }

            Effect::UpdateInvocation {
                turn_id,
                tool_call_id,
                update,
            } => {
                let resolved = match &update {
                    InvocationUpdate::Resolve(result) => Some(result.clone()),
                    _ => None,
                };
                let invocation = self
                    .storage
                    .update_invocation(&conv_id, &turn_id, &tool_call_id, update)
                    .await?;

                let part = Part::ToolInvocation(invocation);
                let view = PartView::render(&part);
                let _ = self.broadcast_tx.send(SseEvent::PartUpdated {
                    turn_id,
                    part,
                    view,
                });
                if let Some(result) = resolved {
                    let _ = self
                        .broadcast_tx
                        .send(SseEvent::ToolResult { tool_call_id, result });
                }
            }

            Effect::PersistState => {
                self.storage.update_state(&conv_id, &self.state).await?;
                let _ = self.broadcast_tx.send(SseEvent::StateChange {
                    state: self.state.clone(),
                });
            }

            Effect::RequestLlm => self.spawn_llm_request(),

            Effect::ExecuteTool { tool } => self.spawn_tool(tool),

            Effect::ScheduleRetry { delay, attempt } => {
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = event_tx.send(Event::RetryTimeout { attempt }).await;
                });
            }

            Effect::ScheduleConfirmationTimeout {
                tool_call_id,
                after,
            } => {
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = event_tx
                        .send(Event::ConfirmationExpired { tool_call_id })
                        .await;
                });
            }

            Effect::NotifyClient { event_type, data } => match event_type.as_str() {
                "agent_done" => {
                    let _ = self.broadcast_tx.send(SseEvent::AgentDone);
                }
                "confirmation_required" => {
                    let _ = self
                        .broadcast_tx
                        .send(SseEvent::ConfirmationRequired { request: data });
                }
                "decision_ignored" => {
                    let _ = self
                        .broadcast_tx
                        .send(SseEvent::DecisionIgnored { notice: data });
                }
                other => {
                    tracing::debug!(event_type = other, "Unhandled client notification");
                }
            },
        }

        Ok(())
    }

    fn spawn_llm_request(&self) {
        let llm_client = self.llm_client.clone();
        let tool_executor = self.tool_executor.clone();
        let storage = self.storage.clone();
        let event_tx = self.event_tx.clone();
        let system_prompt = self.system_prompt.clone();
        let conv_id = self.context.conversation_id.clone();
        let attempt = match &self.state {
            ConvState::LlmRequesting { attempt, .. } => *attempt,
            _ => 1,
        };

        tokio::spawn(async move {
            tracing::info!(
                conv_id = %conv_id,
                model = llm_client.model_id(),
                attempt,
                "Making LLM request"
            );

            let event = match storage.get_turns(&conv_id).await {
                Ok(turns) => {
                    let request = LlmRequest {
                        system: vec![SystemContent::new(&*system_prompt)],
                        messages: build_llm_messages(&turns),
                        tools: tool_executor.definitions(),
                        max_tokens: Some(MAX_RESPONSE_TOKENS),
                    };
                    match llm_client.complete(&request).await {
                        Ok(response) => response_event(&response, tool_executor.as_ref()),
                        Err(e) => Event::LlmError {
                            message: e.message,
                            error_kind: error_kind(e.kind),
                            message_id: new_id(),
                        },
                    }
                }
                Err(e) => Event::LlmError {
                    message: e,
                    error_kind: ErrorKind::Unknown,
                    message_id: new_id(),
                },
            };

            let _ = event_tx.send(event).await;
        });
    }

    fn spawn_tool(&self, tool: ToolCall) {
        let tool_ctx = ToolContext::new(
            self.shutdown.child_token(),
            self.context.conversation_id.clone(),
        );
        let tool_executor = self.tool_executor.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            tracing::info!(tool = %tool.name, id = %tool.id, "Executing tool (background)");

            let result = match tool_executor
                .execute(&tool.name, tool.input.clone(), tool_ctx)
                .await
            {
                Ok(output) => ToolResult::completed(&tool.id, output.output, output.display_data),
                Err(e) => {
                    tracing::warn!(
                        tool = %e.tool_name,
                        id = %tool.id,
                        cause = %e.cause,
                        "Tool execution failed"
                    );
                    ToolResult::failed(&tool.id, &tool.failure_message)
                }
            };

            let _ = event_tx
                .send(Event::ToolComplete {
                    tool_call_id: tool.id,
                    result,
                })
                .await;
        });
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Split a model response into gated calls and calls that failed validation
fn response_event<T: ToolExecutor + ?Sized>(response: &LlmResponse, tools: &T) -> Event {
    let mut tool_calls = Vec::new();
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();

    for (id, name, input) in response.tool_uses() {
        // Invocations are addressed by id within a turn
        let id = if id.is_empty() || seen.contains(id) {
            new_id()
        } else {
            id.to_string()
        };
        seen.insert(id.clone());
        match tools.prepare(&id, name, input) {
            Ok(call) => tool_calls.push(call),
            Err(e) => {
                tracing::warn!(tool = name, id = %id, error = %e, "Rejected tool call");
                rejected.push(RejectedToolCall {
                    tool_call_id: id,
                    tool_name: name.to_string(),
                    args: input.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Event::LlmResponse {
        message_id: new_id(),
        text: response.text(),
        tool_calls,
        rejected,
    }
}

/// Rebuild provider history from the transcript.
///
/// Only resolved invocations are replayed; each is followed by its result.
/// Rejected calls replay as error results so the provider sees every call
/// it issued answered.
pub(crate) fn build_llm_messages(turns: &[Turn]) -> Vec<LlmMessage> {
    let mut messages = Vec::new();

    for turn in turns {
        let mut blocks = Vec::new();
        let mut results = Vec::new();

        for part in &turn.parts {
            match part {
                Part::Text { value } if !value.trim().is_empty() => {
                    blocks.push(ContentBlock::text(value));
                }
                Part::ToolInvocation(invocation) if invocation.state == InvocationState::Resolved => {
                    let Some(result) = &invocation.result else {
                        continue;
                    };
                    blocks.push(ContentBlock::tool_use(
                        &invocation.tool_call_id,
                        &invocation.tool_name,
                        invocation.args.clone(),
                    ));
                    results.push(ContentBlock::tool_result(
                        &invocation.tool_call_id,
                        &result.output,
                        result.is_error(),
                    ));
                }
                Part::Error {
                    rejected_call: Some(call),
                    ..
                } => {
                    blocks.push(ContentBlock::tool_use(
                        &call.tool_call_id,
                        &call.tool_name,
                        call.args.clone(),
                    ));
                    results.push(ContentBlock::tool_result(
                        &call.tool_call_id,
                        &call.reason,
                        true,
                    ));
                }
                _ => {}
            }
        }

        if blocks.is_empty() {
            continue;
        }

        match turn.role {
            Role::User => messages.push(LlmMessage::user(blocks)),
            Role::Assistant => {
                messages.push(LlmMessage::assistant(blocks));
                if !results.is_empty() {
                    messages.push(LlmMessage::user(results));
                }
            }
        }
    }

    messages
}

fn error_kind(kind: LlmErrorKind) -> ErrorKind {
    match kind {
        LlmErrorKind::Network => ErrorKind::Network,
        LlmErrorKind::RateLimit => ErrorKind::RateLimit,
        LlmErrorKind::ServerError => ErrorKind::ServerError,
        LlmErrorKind::Auth => ErrorKind::Auth,
        LlmErrorKind::InvalidRequest => ErrorKind::InvalidRequest,
        LlmErrorKind::Unknown => ErrorKind::Unknown,
    }
}
