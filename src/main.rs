//! Confirmation chat server
//!
//! A chat backend where every tool call the model asks for is shown to the
//! user and only runs once approved.

mod api;
mod config;
mod llm;
mod runtime;
mod state_machine;
mod store;
mod tools;
mod transcript;

use api::{create_router, AppState};
use config::AppConfig;
use llm::{LlmConfig, ModelRegistry};
use runtime::RuntimeManager;
use std::net::SocketAddr;
use std::sync::Arc;
use store::MemoryStore;
use tokio_util::sync::CancellationToken;
use tools::ToolRegistry;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confirm_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env();
    tracing::info!(
        port = config.port,
        max_steps = config.max_steps,
        tool_delay_ms = ?config.tool_delay.map(|d| d.as_millis()),
        confirmation_timeout_secs = ?config.confirmation_timeout.map(|d| d.as_secs()),
        "Loaded configuration"
    );

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set DEEPSEEK_API_KEY or OPENAI_API_KEY.");
    }

    let tools = Arc::new(ToolRegistry::standard(config.tool_delay));
    let shutdown = CancellationToken::new();
    let port = config.port;

    let runtime = Arc::new(RuntimeManager::new(
        MemoryStore::new(),
        llm_registry,
        tools,
        config,
        shutdown,
    ));
    let state = AppState::new(runtime.clone());

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new().gzip(true).br(true).deflate(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Confirmation chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            runtime.shutdown();
        })
        .await?;

    Ok(())
}
