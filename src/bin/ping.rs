//! Connectivity check for the configured DeepSeek endpoint
//!
//! Sends one short prompt and reports whether a reply came back.

use serde_json::{json, Value};
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const PING_MODEL: &str = "deepseek-chat";
const PING_PROMPT: &str = "Hello, please respond with \"API working!\"";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confirm_chat_ping=info".into()),
        )
        .init();

    let Some(api_key) = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
    else {
        tracing::error!("DEEPSEEK_API_KEY is not set");
        return ExitCode::FAILURE;
    };
    let base_url =
        std::env::var("DEEPSEEK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

    match ping(&api_key, &base_url).await {
        Ok(reply) => {
            tracing::info!(model = PING_MODEL, reply = %reply, "API working");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(model = PING_MODEL, error = %e, "API check failed");
            ExitCode::FAILURE
        }
    }
}

async fn ping(api_key: &str, base_url: &str) -> Result<String, String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    tracing::info!(url = %url, "Sending test prompt");

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&json!({
            "model": PING_MODEL,
            "messages": [{"role": "user", "content": PING_PROMPT}],
            "max_tokens": 64
        }))
        .send()
        .await
        .map_err(|e| format!("Request failed: {e}"))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("Invalid response body: {e}"))?;

    if !status.is_success() {
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("unknown error")
            .to_string();
        return Err(format!("HTTP {status}: {message}"));
    }

    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| "Response had no message content".to_string())
}
