//! Centralized model definitions for all LLM providers

use super::openai::{OpenAIModel, OpenAIService};
use super::LlmService;
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    DeepSeek,
    OpenAI,
}

impl Provider {
    /// Get the display name for this provider
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::DeepSeek => "DeepSeek",
            Provider::OpenAI => "OpenAI",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "deepseek-chat")
    pub id: &'static str,
    /// Provider for this model
    pub provider: Provider,
    /// Human-readable description
    pub description: &'static str,
    /// Context window size in tokens
    pub context_window: usize,
    /// Factory taking the API key and an optional base URL override
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn openai_compatible(
    model: OpenAIModel,
    api_key: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    if api_key.is_empty() {
        return Err(format!(
            "{} requires {}",
            model.model_id(),
            model.provider().api_key_env_var()
        ));
    }
    let service = OpenAIService::new(api_key.to_string(), model, base_url)
        .map_err(|e| e.to_string())?;
    Ok(Arc::new(service))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "deepseek-chat",
            provider: Provider::DeepSeek,
            description: "DeepSeek Chat (default, tool calling)",
            context_window: 64_000,
            factory: |api_key, base_url| {
                openai_compatible(OpenAIModel::DeepseekChat, api_key, base_url)
            },
        },
        ModelDef {
            id: "gpt-4o",
            provider: Provider::OpenAI,
            description: "GPT-4o",
            context_window: 128_000,
            factory: |api_key, base_url| openai_compatible(OpenAIModel::GPT4o, api_key, base_url),
        },
        ModelDef {
            id: "gpt-4o-mini",
            provider: Provider::OpenAI,
            description: "GPT-4o Mini (fast, cheap)",
            context_window: 128_000,
            factory: |api_key, base_url| {
                openai_compatible(OpenAIModel::GPT4oMini, api_key, base_url)
            },
        },
    ]
}
