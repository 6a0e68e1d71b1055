//! Process configuration read once at startup

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. When the user asks about the location of an IP address, the weather somewhere, or wants a Fahrenheit temperature in Celsius, call the matching tool instead of guessing. Every tool call is shown to the user for confirmation first; if a call is cancelled, acknowledge it briefly and do not retry it on your own.";

/// Server and conversation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Overrides every tool's simulated latency
    pub tool_delay: Option<Duration>,
    /// Pending confirmations expire after this long. Unset waits forever.
    pub confirmation_timeout: Option<Duration>,
    /// Model rounds per user message
    pub max_steps: u32,
    pub system_prompt: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tool_delay: None,
            confirmation_timeout: None,
            max_steps: 1,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = parse_var(&lookup, "CONFIRM_CHAT_PORT").unwrap_or(defaults.port);
        let tool_delay =
            parse_var::<u64>(&lookup, "CONFIRM_CHAT_TOOL_DELAY_MS").map(Duration::from_millis);
        let confirmation_timeout = parse_var::<u64>(&lookup, "CONFIRM_CHAT_CONFIRMATION_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let max_steps = parse_var::<u32>(&lookup, "CONFIRM_CHAT_MAX_STEPS")
            .unwrap_or(defaults.max_steps)
            .max(1);
        let system_prompt = lookup("CONFIRM_CHAT_SYSTEM_PROMPT")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(defaults.system_prompt);

        Self {
            port,
            tool_delay,
            confirmation_timeout,
            max_steps,
            system_prompt,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}
