//! Server-rendered panels for transcript parts
//!
//! Clients only dispatch decisions and draw what they are given here.

use super::{ApprovalDecision, ErrorKind, InvocationState, Part, ToolInvocation, ToolOutcome};
use serde::Serialize;
use serde_json::Value;

const CONFIRM_LABEL: &str = "确认执行";
const DENY_LABEL: &str = "取消";
const CONFIRM_HINT: &str = "💡 请确认是否要执行此工具调用";
const CANCELLED_SUFFIX: &str = "有什么其他我可以帮助您的吗？";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Text,
    Queued,
    Confirmation,
    Executing,
    Result,
    Cancelled,
    Failed,
    Error,
}

/// Visual emphasis for a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Info,
    Success,
    Warning,
    Danger,
}

/// A button on a confirmation panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewAction {
    pub label: String,
    pub decision: ApprovalDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartView {
    pub kind: ViewKind,
    pub tone: Tone,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ViewAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Suggested next prompt, sent as a new user message when clicked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

impl PartView {
    fn new(kind: ViewKind, tone: Tone, body: impl Into<String>) -> Self {
        Self {
            kind,
            tone,
            title: None,
            body: body.into(),
            tool_call_id: None,
            args: None,
            actions: Vec::new(),
            hint: None,
            follow_up: None,
        }
    }

    pub fn render(part: &Part) -> Self {
        match part {
            Part::Text { value } => Self::new(ViewKind::Text, Tone::Neutral, value.clone()),
            Part::ToolInvocation(invocation) => Self::render_invocation(invocation),
            Part::Error { kind, message, .. } => {
                let title = match kind {
                    ErrorKind::SchemaValidation => "⚠️ 工具调用参数无效",
                    _ => "⚠️ 请求失败",
                };
                let mut view = Self::new(ViewKind::Error, Tone::Danger, message.clone());
                view.title = Some(title.to_string());
                view
            }
        }
    }

    fn render_invocation(invocation: &ToolInvocation) -> Self {
        let mut view = if invocation.is_executing() {
            Self::new(
                ViewKind::Executing,
                Tone::Neutral,
                format!("正在执行工具：{}...", invocation.description),
            )
        } else {
            match (&invocation.state, &invocation.result) {
                (InvocationState::PendingCall, _) => Self::new(
                    ViewKind::Queued,
                    Tone::Neutral,
                    format!("等待确认：{}", invocation.description),
                ),
                (InvocationState::AwaitingConfirmation, _) => {
                    let mut view =
                        Self::new(ViewKind::Confirmation, Tone::Info, describe_args(&invocation.args));
                    view.title = Some(format!("🔧 准备调用工具：{}", invocation.description));
                    view.args = Some(invocation.args.clone());
                    view.actions = vec![
                        ViewAction {
                            label: CONFIRM_LABEL.to_string(),
                            decision: ApprovalDecision::Approved,
                        },
                        ViewAction {
                            label: DENY_LABEL.to_string(),
                            decision: ApprovalDecision::Denied,
                        },
                    ];
                    view.hint = Some(CONFIRM_HINT.to_string());
                    view
                }
                (InvocationState::Resolved, Some(result)) => match result.outcome {
                    ToolOutcome::Completed => {
                        let mut view =
                            Self::new(ViewKind::Result, Tone::Success, result.output.clone());
                        view.title = Some(result_title(
                            result.display_data.as_ref(),
                            &invocation.description,
                        ));
                        view.follow_up = result
                            .display_data
                            .as_ref()
                            .and_then(|data| data.get("follow_up"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        view
                    }
                    ToolOutcome::Cancelled => Self::new(
                        ViewKind::Cancelled,
                        Tone::Warning,
                        format!("❌ {}。{CANCELLED_SUFFIX}", result.output),
                    ),
                    ToolOutcome::Failed => {
                        Self::new(ViewKind::Failed, Tone::Danger, result.output.clone())
                    }
                },
                // Resolved without a result cannot be built through `apply`
                (InvocationState::Resolved, None) => {
                    Self::new(ViewKind::Failed, Tone::Danger, invocation.description.clone())
                }
            }
        };
        view.tool_call_id = Some(invocation.tool_call_id.clone());
        view
    }
}

fn result_title(display_data: Option<&Value>, description: &str) -> String {
    let kind = display_data
        .and_then(|data| data.get("type"))
        .and_then(Value::as_str);
    match kind {
        Some("ip_location") => "🌍 IP 地理位置查询结果".to_string(),
        Some("weather") => "🌤️ 天气信息".to_string(),
        Some("temperature_conversion") => "✅ 温度转换完成".to_string(),
        _ => format!("✅ {description}"),
    }
}

fn describe_args(args: &Value) -> String {
    match args {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}: {s}"),
                other => format!("{key}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
