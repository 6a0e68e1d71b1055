//! Tools the assistant may ask to run
//!
//! Each tool is a pure random-number generator behind simulated latency.
//! Arguments are validated and coerced here, before the confirmation gate
//! ever sees the call.

pub mod ip_location;
pub mod temperature;
pub mod weather;

pub use ip_location::IpLocationTool;
pub use temperature::ConvertTemperatureTool;
pub use weather::WeatherTool;

use crate::llm::ToolDefinition;
use crate::state_machine::ToolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Successful output of a tool run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_data: Option<Value>,
}

impl ToolOutput {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            display_data: None,
        }
    }

    pub fn with_display(mut self, data: Value) -> Self {
        self.display_data = Some(data);
        self
    }
}

/// Per-call context handed to a tool
#[derive(Clone)]
pub struct ToolContext {
    /// Cancellation signal for the simulated latency
    pub cancel: CancellationToken,

    /// The conversation this tool is executing within
    pub conversation_id: String,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, conversation_id: impl Into<String>) -> Self {
        Self {
            cancel,
            conversation_id: conversation_id.into(),
        }
    }
}

/// A tool call that cannot be presented to the user
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaValidationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

impl SchemaValidationError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        SchemaValidationError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }
}

/// A tool run that failed after approval
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tool_name} failed: {cause}")]
pub struct ExecutionError {
    pub tool_name: String,
    pub cause: String,
}

impl ExecutionError {
    pub fn new(tool_name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            cause: cause.into(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool
    fn name(&self) -> &'static str;

    /// Human-readable name shown on the confirmation panel
    fn display_name(&self) -> &'static str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    fn requires_confirmation(&self) -> bool {
        true
    }

    /// Check and normalize raw arguments from the model
    fn validate(&self, input: &Value) -> Result<Value, SchemaValidationError>;

    /// Result text when the user declines the call
    fn cancellation_message(&self) -> String;

    /// User-visible text when an approved run fails
    fn failure_message(&self) -> String;

    /// Run with validated input. Long waits must observe `ctx.cancel`.
    async fn run(&self, input: Value, ctx: ToolContext) -> Result<ToolOutput, ExecutionError>;
}

/// Tool metadata exposed over the API
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub requires_confirmation: bool,
    pub parameters: Value,
}

/// The set of tools shared by every conversation. Built once at startup.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// The three demo tools. `delay` overrides every tool's simulated
    /// latency when set.
    pub fn standard(delay: Option<Duration>) -> Self {
        let mut registry = Self::empty();
        match delay {
            Some(delay) => {
                registry.register(Arc::new(IpLocationTool::new(delay)));
                registry.register(Arc::new(WeatherTool::new(delay)));
                registry.register(Arc::new(ConvertTemperatureTool::new(delay)));
            }
            None => {
                registry.register(Arc::new(IpLocationTool::default()));
                registry.register(Arc::new(WeatherTool::default()));
                registry.register(Arc::new(ConvertTemperatureTool::default()));
            }
        }
        registry
    }

    /// Add a tool, replacing any tool registered under the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            tracing::warn!(tool = tool.name(), "Replacing registered tool");
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                display_name: t.display_name().to_string(),
                description: t.description(),
                requires_confirmation: t.requires_confirmation(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    /// Validate a model tool request and capture everything the state
    /// machine needs to gate and resolve it
    pub fn prepare(
        &self,
        id: &str,
        name: &str,
        input: &Value,
    ) -> Result<ToolCall, SchemaValidationError> {
        let tool = self
            .get(name)
            .ok_or_else(|| SchemaValidationError::UnknownTool(name.to_string()))?;
        let input = tool.validate(input)?;
        Ok(ToolCall {
            id: id.to_string(),
            name: tool.name().to_string(),
            display_name: tool.display_name().to_string(),
            input,
            requires_confirmation: tool.requires_confirmation(),
            cancellation_message: tool.cancellation_message(),
            failure_message: tool.failure_message(),
        })
    }

    /// Execute a tool by name with context
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ExecutionError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ExecutionError::new(name, "tool is not registered"))?;
        tool.run(input, ctx).await
    }
}

/// Wait out a tool's simulated latency unless the run is cancelled first
pub(crate) async fn simulate_latency(
    delay: Duration,
    ctx: &ToolContext,
    tool_name: &str,
) -> Result<(), ExecutionError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => Ok(()),
        () = ctx.cancel.cancelled() => Err(ExecutionError::new(tool_name, "interrupted before completion")),
    }
}

/// Required, non-blank string argument
pub(crate) fn required_text(
    tool: &str,
    field: &str,
    value: Option<&Value>,
) -> Result<String, SchemaValidationError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(SchemaValidationError::invalid(
            tool,
            format!("`{field}` must not be empty"),
        )),
        Some(other) => Err(SchemaValidationError::invalid(
            tool,
            format!("`{field}` must be a string, got {other}"),
        )),
        None => Err(SchemaValidationError::invalid(
            tool,
            format!("missing required field `{field}`"),
        )),
    }
}

/// Arguments must arrive as a JSON object
pub(crate) fn as_object<'a>(
    tool: &str,
    input: &'a Value,
) -> Result<&'a serde_json::Map<String, Value>, SchemaValidationError> {
    input
        .as_object()
        .ok_or_else(|| SchemaValidationError::invalid(tool, "arguments must be a JSON object"))
}

#[cfg(test)]
pub(crate) fn test_context() -> ToolContext {
    ToolContext::new(CancellationToken::new(), "test-conv")
}
