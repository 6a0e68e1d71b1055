//! Mock implementations and end-to-end runtime scenarios
//!
//! The runtime runs for real against an in-memory store, a scripted LLM
//! and the real tool registry wrapped in a spy.

use super::executor::{ConversationRuntime, RuntimeChannels};
use super::traits::{LlmClient, ToolExecutor};
use super::SseEvent;
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, ToolDefinition, Usage};
use crate::state_machine::{ConvContext, ConvState, Event, ToolCall};
use crate::store::MemoryStore;
use crate::tools::{
    ExecutionError, SchemaValidationError, ToolContext, ToolOutput, ToolRegistry,
};
use crate::transcript::{ApprovalDecision, Turn};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

const CONV_ID: &str = "test-conv";
const WAIT: Duration = Duration::from_secs(30);

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Record of all requests made
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::invalid_request("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::text(text)],
        end_turn: true,
        usage: Usage::default(),
    }
}

pub fn tool_response(calls: &[(&str, &str, Value)]) -> LlmResponse {
    LlmResponse {
        content: calls
            .iter()
            .map(|(id, name, input)| ContentBlock::tool_use(*id, *name, input.clone()))
            .collect(),
        end_turn: false,
        usage: Usage::default(),
    }
}

// ============================================================================
// Spy Tool Executor
// ============================================================================

/// The real registry with zero latency, counting every execution
pub struct SpyToolExecutor {
    registry: ToolRegistry,
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
    fail_next: AtomicBool,
}

impl SpyToolExecutor {
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::standard(Some(Duration::ZERO)),
            calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tool names in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ToolExecutor for SpyToolExecutor {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(name.to_string());
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ExecutionError::new(name, "simulated upstream outage"));
        }
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    fn prepare(
        &self,
        id: &str,
        name: &str,
        input: &Value,
    ) -> Result<ToolCall, SchemaValidationError> {
        self.registry.prepare(id, name, input)
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// A running conversation plus handles to everything it touches
pub struct TestRuntime {
    pub store: MemoryStore,
    pub llm: Arc<MockLlmClient>,
    pub tools: Arc<SpyToolExecutor>,
    event_tx: mpsc::Sender<Event>,
    events: broadcast::Receiver<SseEvent>,
    shutdown: CancellationToken,
}

pub struct TestRuntimeBuilder {
    max_steps: u32,
    confirmation_timeout: Option<Duration>,
    llm: Arc<MockLlmClient>,
}

impl TestRuntimeBuilder {
    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = Some(timeout);
        self
    }

    pub fn respond(self, response: LlmResponse) -> Self {
        self.llm.queue_response(response);
        self
    }

    pub fn fail(self, error: LlmError) -> Self {
        self.llm.queue_error(error);
        self
    }

    pub fn start(self) -> TestRuntime {
        let store = MemoryStore::new();
        store
            .create_conversation(CONV_ID, "test-slug", "mock-model")
            .unwrap();

        let tools = Arc::new(SpyToolExecutor::new());
        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, events) = broadcast::channel(256);
        let (state_tx, _) = watch::channel(ConvState::Idle);
        let shutdown = CancellationToken::new();

        let context = ConvContext::new(CONV_ID, "mock-model")
            .with_max_steps(self.max_steps)
            .with_confirmation_timeout(self.confirmation_timeout);

        let runtime = ConversationRuntime::new(
            context,
            ConvState::Idle,
            store.clone(),
            self.llm.clone(),
            tools.clone(),
            RuntimeChannels {
                event_rx,
                event_tx: event_tx.clone(),
                broadcast_tx,
                state_tx,
            },
        )
        .with_shutdown(shutdown.clone());
        tokio::spawn(runtime.run());

        TestRuntime {
            store,
            llm: self.llm,
            tools,
            event_tx,
            events,
            shutdown,
        }
    }
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            max_steps: 1,
            confirmation_timeout: None,
            llm: Arc::new(MockLlmClient::new()),
        }
    }

    pub async fn send_message(&self, text: &str) {
        self.send_message_with_id(text, &uuid::Uuid::new_v4().to_string())
            .await;
    }

    pub async fn send_message_with_id(&self, text: &str, message_id: &str) {
        self.event_tx
            .send(Event::UserMessage {
                text: text.to_string(),
                message_id: message_id.to_string(),
            })
            .await
            .unwrap();
    }

    pub async fn decide(&self, tool_call_id: &str, decision: ApprovalDecision) {
        self.event_tx
            .send(Event::UserDecision {
                tool_call_id: tool_call_id.to_string(),
                decision,
            })
            .await
            .unwrap();
    }

    /// Wait for the first broadcast matching `pred`, skipping the rest
    pub async fn wait_for(&mut self, pred: impl Fn(&SseEvent) -> bool) -> SseEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for runtime event")
    }

    pub async fn wait_for_confirmation(&mut self, tool_call_id: &str) {
        self.wait_for(|e| {
            matches!(e, SseEvent::ConfirmationRequired { request }
                if request["tool_call_id"] == tool_call_id)
        })
        .await;
    }

    pub async fn wait_for_done(&mut self) {
        self.wait_for(|e| matches!(e, SseEvent::AgentDone)).await;
    }

    /// Last persisted state. Client notifications are sent after it is stored.
    pub fn state(&self) -> ConvState {
        self.store.get_conversation(CONV_ID).unwrap().state
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.store.get_turns(CONV_ID).unwrap()
    }
}

impl Drop for TestRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::gate::EXPIRED_PREFIX;
    use crate::tools::ip_location::{DOMESTIC_CITIES, INTERNATIONAL_CITIES, PUBLIC_IPS};
    use crate::tools::weather::TEMPERATURE_RANGE_F;
    use crate::transcript::{
        has_pending_confirmation, ErrorKind, InvocationState, Part, Role, ToolInvocation,
        ToolOutcome, ToolResult,
    };
    use serde_json::json;

    fn only_invocation(turns: &[Turn]) -> ToolInvocation {
        let invocations: Vec<_> = turns.iter().flat_map(Turn::invocations).cloned().collect();
        assert_eq!(invocations.len(), 1, "expected exactly one invocation");
        invocations.into_iter().next().unwrap()
    }

    fn result_of(invocation: &ToolInvocation) -> ToolResult {
        assert_eq!(invocation.state, InvocationState::Resolved);
        invocation.result.clone().unwrap()
    }

    #[tokio::test]
    async fn test_plain_text_reply() {
        let mut rt = TestRuntime::builder()
            .respond(text_response("你好！有什么可以帮您？"))
            .start();

        rt.send_message("你好").await;
        rt.wait_for_done().await;

        let turns = rt.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, "你好！有什么可以帮您？");
        assert_eq!(rt.state(), ConvState::Idle);

        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools.len(), 3);
    }

    #[tokio::test]
    async fn test_weather_approved() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .start();

        rt.send_message("weather in Beijing").await;
        rt.wait_for_confirmation("call-1").await;

        // Nothing runs while the call is pending
        assert_eq!(rt.tools.call_count(), 0);
        assert!(has_pending_confirmation(&rt.turns()));
        assert!(matches!(
            rt.state(),
            ConvState::AwaitingConfirmation { .. }
        ));
        let turns_while_pending = rt.turns().len();

        rt.decide("call-1", ApprovalDecision::Approved).await;
        let event = rt
            .wait_for(|e| matches!(e, SseEvent::ToolResult { .. }))
            .await;
        let SseEvent::ToolResult {
            tool_call_id,
            result,
        } = event
        else {
            unreachable!()
        };
        assert_eq!(tool_call_id, "call-1");
        assert_eq!(result.outcome, ToolOutcome::Completed);
        rt.wait_for_done().await;

        let turns = rt.turns();
        // The round-trip updated the assistant turn in place
        assert_eq!(turns.len(), turns_while_pending);
        let invocation = only_invocation(&turns);
        assert_eq!(invocation.decision, Some(ApprovalDecision::Approved));
        let data = result_of(&invocation).display_data.unwrap();
        let temperature = data["temperature_f"].as_i64().unwrap();
        assert!(TEMPERATURE_RANGE_F.contains(&temperature));
        assert_eq!(rt.tools.call_count(), 1);
        assert!(!has_pending_confirmation(&turns));
    }

    #[tokio::test]
    async fn test_weather_denied() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .start();

        rt.send_message("weather in Beijing").await;
        rt.wait_for_confirmation("call-1").await;
        rt.decide("call-1", ApprovalDecision::Denied).await;
        rt.wait_for_done().await;

        let result = result_of(&only_invocation(&rt.turns()));
        assert_eq!(result.outcome, ToolOutcome::Cancelled);
        assert_eq!(result.output, "用户取消了天气查询");
        assert!(result.display_data.is_none());
        assert!(!result.output.contains("°F"));
        assert_eq!(rt.tools.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ip_lookup_public_and_private() {
        for ip in PUBLIC_IPS.iter().copied().chain(["192.168.1.1", "10.0.0.8"]) {
            let mut rt = TestRuntime::builder()
                .respond(tool_response(&[("call-ip", "ipToLocation", json!({"ip": ip}))]))
                .start();

            rt.send_message("where is this ip?").await;
            rt.wait_for_confirmation("call-ip").await;
            rt.decide("call-ip", ApprovalDecision::Approved).await;
            rt.wait_for_done().await;

            let data = result_of(&only_invocation(&rt.turns()))
                .display_data
                .unwrap();
            let location = data["location"].as_str().unwrap().to_string();
            if PUBLIC_IPS.contains(&ip) {
                assert!(INTERNATIONAL_CITIES.contains(&location.as_str()), "{ip} -> {location}");
            } else {
                assert!(DOMESTIC_CITIES.contains(&location.as_str()), "{ip} -> {location}");
            }
        }
    }

    #[tokio::test]
    async fn test_conversion_approved() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[(
                "call-c",
                "convertFahrenheitToCelsius",
                json!({"temperature": 98, "location": "上海"}),
            )]))
            .start();

        rt.send_message("98F in Shanghai to Celsius").await;
        rt.wait_for_confirmation("call-c").await;
        rt.decide("call-c", ApprovalDecision::Approved).await;
        rt.wait_for_done().await;

        let result = result_of(&only_invocation(&rt.turns()));
        let data = result.display_data.unwrap();
        assert_eq!(data["original_temp"].as_f64(), Some(98.0));
        assert_eq!(data["converted_temp"].as_i64(), Some(37));
        assert_eq!(data["location"], "上海");
        assert_eq!(result.output, "98°F 转换为摄氏度是 37°C");
    }

    #[tokio::test]
    async fn test_double_decision_is_ignored() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .start();

        rt.send_message("weather").await;
        rt.wait_for_confirmation("call-1").await;
        rt.decide("call-1", ApprovalDecision::Denied).await;
        rt.decide("call-1", ApprovalDecision::Approved).await;

        rt.wait_for(|e| matches!(e, SseEvent::DecisionIgnored { .. }))
            .await;
        let invocation = only_invocation(&rt.turns());
        assert_eq!(invocation.decision, Some(ApprovalDecision::Denied));
        assert_eq!(result_of(&invocation).outcome, ToolOutcome::Cancelled);
        assert_eq!(rt.tools.call_count(), 0);
    }

    #[tokio::test]
    async fn test_message_rejected_while_confirmation_pending() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .start();

        rt.send_message("weather").await;
        rt.wait_for_confirmation("call-1").await;
        rt.send_message("never mind").await;

        let SseEvent::Error { message } = rt
            .wait_for(|e| matches!(e, SseEvent::Error { .. }))
            .await
        else {
            unreachable!()
        };
        assert!(message.contains("waiting for confirmation"));
        assert_eq!(
            rt.turns()
                .iter()
                .filter(|t| t.role == Role::User)
                .count(),
            1
        );
        assert_eq!(rt.llm.recorded_requests().len(), 1);
        assert!(has_pending_confirmation(&rt.turns()));
    }

    #[tokio::test]
    async fn test_failed_persist_returns_to_idle() {
        let mut rt = TestRuntime::builder()
            .respond(text_response("第一条回复"))
            .respond(text_response("第二条回复"))
            .start();

        rt.send_message_with_id("你好", "m1").await;
        rt.wait_for_done().await;

        // Same turn id again: the user turn cannot be stored
        rt.send_message_with_id("你好", "m1").await;
        rt.wait_for_done().await;

        assert_eq!(rt.state(), ConvState::Idle);
        assert_eq!(rt.llm.recorded_requests().len(), 1);
        let turns = rt.turns();
        assert_eq!(turns.len(), 3);
        assert!(matches!(
            turns[2].parts.as_slice(),
            [Part::Error { kind: ErrorKind::Unknown, .. }]
        ));

        // The conversation still accepts input
        rt.send_message("还在吗").await;
        rt.wait_for_done().await;
        let turns = rt.turns();
        assert_eq!(turns.last().unwrap().content, "第二条回复");
        assert_eq!(rt.state(), ConvState::Idle);
    }

    #[tokio::test]
    async fn test_non_retryable_error_appends_error_turn() {
        let mut rt = TestRuntime::builder()
            .fail(LlmError::auth("invalid api key"))
            .start();

        rt.send_message("你好").await;
        rt.wait_for_done().await;

        let turns = rt.turns();
        assert_eq!(turns.len(), 2);
        assert!(matches!(
            &turns[1].parts[0],
            Part::Error { kind: ErrorKind::Auth, message, .. } if message == "invalid api key"
        ));
        assert_eq!(rt.llm.recorded_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_then_success() {
        let mut rt = TestRuntime::builder()
            .fail(LlmError::server_error("502 bad gateway"))
            .respond(text_response("恢复了"))
            .start();

        rt.send_message("你好").await;
        rt.wait_for_done().await;

        let turns = rt.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "恢复了");
        assert_eq!(rt.llm.recorded_requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let mut rt = TestRuntime::builder()
            .fail(LlmError::network("connection reset"))
            .fail(LlmError::network("connection reset"))
            .fail(LlmError::network("connection reset"))
            .start();

        rt.send_message("你好").await;
        rt.wait_for_done().await;

        let turns = rt.turns();
        assert!(matches!(
            &turns[1].parts[0],
            Part::Error { kind: ErrorKind::Network, message, .. }
                if message.starts_with("Failed after 3 attempts")
        ));
        assert_eq!(rt.llm.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_call_is_rejected_and_echoed() {
        let mut rt = TestRuntime::builder()
            .max_steps(2)
            .respond(tool_response(&[("call-x", "teleport", json!({"to": "月球"}))]))
            .respond(text_response("next"))
            .start();

        rt.send_message("teleport me").await;
        rt.wait_for_done().await;

        // Nothing valid to gate, so the exchange ends without asking again
        assert_eq!(rt.tools.call_count(), 0);
        assert_eq!(rt.llm.recorded_requests().len(), 1);
        let turns = rt.turns();
        assert!(matches!(
            &turns[1].parts[0],
            Part::Error { kind: ErrorKind::SchemaValidation, rejected_call: Some(call), .. }
                if call.tool_call_id == "call-x"
        ));

        // The rejected call is answered when history is replayed
        rt.send_message("ok").await;
        rt.wait_for_done().await;
        let requests = rt.llm.recorded_requests();
        let replayed = &requests[1].messages;
        assert!(replayed.iter().flat_map(|m| &m.content).any(|block| matches!(
            block,
            ContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "call-x"
        )));
    }

    #[tokio::test]
    async fn test_multiple_calls_presented_one_at_a_time() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[
                ("call-1", "weather", json!({"location": "北京"})),
                ("call-2", "ipToLocation", json!({"ip": "1.1.1.1"})),
            ]))
            .start();

        rt.send_message("both please").await;
        rt.wait_for_confirmation("call-1").await;
        assert_eq!(rt.state().awaiting_call().map(|c| c.id.as_str()), Some("call-1"));

        // The second call cannot be decided before it is presented
        rt.decide("call-2", ApprovalDecision::Approved).await;
        rt.wait_for(|e| matches!(e, SseEvent::DecisionIgnored { .. }))
            .await;

        rt.decide("call-1", ApprovalDecision::Denied).await;
        rt.wait_for_confirmation("call-2").await;
        rt.decide("call-2", ApprovalDecision::Approved).await;
        rt.wait_for_done().await;

        let turns = rt.turns();
        let outcomes: Vec<_> = turns
            .iter()
            .flat_map(Turn::invocations)
            .map(|inv| result_of(inv).outcome)
            .collect();
        assert_eq!(outcomes, vec![ToolOutcome::Cancelled, ToolOutcome::Completed]);
        assert_eq!(rt.tools.executed(), vec!["ipToLocation".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_expires_as_denial() {
        let mut rt = TestRuntime::builder()
            .confirmation_timeout(Duration::from_secs(10))
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .start();

        rt.send_message("weather").await;
        rt.wait_for_confirmation("call-1").await;
        rt.wait_for_done().await;

        let invocation = only_invocation(&rt.turns());
        assert_eq!(invocation.decision, Some(ApprovalDecision::Denied));
        let result = result_of(&invocation);
        assert_eq!(result.output, format!("{EXPIRED_PREFIX}用户取消了天气查询"));
        assert_eq!(rt.tools.call_count(), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_resolves_with_failure_message() {
        let mut rt = TestRuntime::builder()
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .start();
        rt.tools.fail_next();

        rt.send_message("weather").await;
        rt.wait_for_confirmation("call-1").await;
        rt.decide("call-1", ApprovalDecision::Approved).await;
        rt.wait_for_done().await;

        let result = result_of(&only_invocation(&rt.turns()));
        assert_eq!(result.outcome, ToolOutcome::Failed);
        assert_eq!(result.output, "获取天气信息失败，请稍后重试。");
        assert_eq!(rt.tools.call_count(), 1);
    }

    #[tokio::test]
    async fn test_second_step_sees_tool_results() {
        let mut rt = TestRuntime::builder()
            .max_steps(2)
            .respond(tool_response(&[(
                "call-1",
                "weather",
                json!({"location": "北京"}),
            )]))
            .respond(text_response("北京现在挺暖和的"))
            .start();

        rt.send_message("weather").await;
        rt.wait_for_confirmation("call-1").await;
        rt.decide("call-1", ApprovalDecision::Approved).await;
        rt.wait_for_done().await;

        let requests = rt.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert!(matches!(
            &last.content[0],
            ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "call-1"
        ));

        let turns = rt.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].content, "北京现在挺暖和的");
    }
}
