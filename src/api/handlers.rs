//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequest, ChatResponse, ConversationDetailResponse, ConversationListResponse,
    ConversationResponse, CreateConversationRequest, DecisionRequest, DecisionResponse,
    DecisionStatus, ErrorResponse, ModelsResponse, TurnView,
};
use super::AppState;
use crate::llm::all_models;
use crate::runtime::SseEvent;
use crate::state_machine::gate::check_decision;
use crate::state_machine::{ConvState, Event};
use crate::tools::ToolDescriptor;
use crate::transcript::{has_pending_confirmation, ApprovalDecision};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Local, Timelike};
use rand::seq::SliceRandom;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/stream", get(stream_conversation))
        // User actions
        .route("/api/conversations/:id/chat", post(send_chat))
        .route("/api/conversations/:id/decisions", post(submit_decision))
        // Registry info
        .route("/api/tools", get(list_tools))
        .route("/api/models", get(list_models))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn list_conversations(State(state): State<AppState>) -> Json<ConversationListResponse> {
    Json(ConversationListResponse {
        conversations: state.runtime.store().list_conversations(),
    })
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<ConversationResponse>, AppError> {
    let model = match req.model {
        Some(model) if all_models().iter().any(|def| def.id == model) => model,
        Some(model) => return Err(AppError::BadRequest(format!("Unknown model: {model}"))),
        None => state.runtime.model_registry().default_model_id().to_string(),
    };

    // Generate ID and slug
    let id = uuid::Uuid::new_v4().to_string();
    let slug = generate_slug();

    let conversation = state
        .runtime
        .store()
        .create_conversation(&id, &slug, &model)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(conv_id = %id, slug = %slug, model = %model, "Created conversation");
    Ok(Json(ConversationResponse { conversation }))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, AppError> {
    let store = state.runtime.store();
    let conversation = store
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    let turns = store
        .get_turns(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ConversationDetailResponse {
        agent_working: conversation.is_agent_working(),
        has_pending_confirmation: has_pending_confirmation(&turns),
        conversation,
        turns: turns.into_iter().map(TurnView::from).collect(),
    }))
}

// ============================================================
// SSE Streaming
// ============================================================

async fn stream_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .runtime
        .store()
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    // Subscribe before the snapshot so nothing falls between the two
    let broadcast_rx = state
        .runtime
        .subscribe(&id)
        .await
        .map_err(AppError::Internal)?;

    let store = state.runtime.store();
    let conversation = store
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    let turns = store
        .get_turns(&id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let init_event = SseEvent::Init {
        conversation,
        has_pending_confirmation: has_pending_confirmation(&turns),
        turns,
    };

    Ok(sse_stream(init_event, broadcast_rx))
}

// ============================================================
// User Actions
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }
    state
        .runtime
        .store()
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    // A retried send is a no-op
    if let Some(message_id) = &req.message_id {
        if state.runtime.store().turn_exists(&id, message_id) {
            tracing::info!(conv_id = %id, message_id = %message_id, "Duplicate message ignored");
            return Ok(Json(ChatResponse { queued: false }));
        }
    }

    match state
        .runtime
        .current_state(&id)
        .await
        .map_err(AppError::Internal)?
    {
        ConvState::Idle => {}
        ConvState::AwaitingConfirmation { .. } => {
            return Err(AppError::Conflict(
                "A tool call is waiting for confirmation".to_string(),
            ))
        }
        _ => return Err(AppError::Conflict("Agent is busy".to_string())),
    }

    let event = Event::UserMessage {
        text: req.text,
        message_id: req
            .message_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };
    state
        .runtime
        .send_event(&id, event)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse { queued: true }))
}

async fn submit_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    state
        .runtime
        .store()
        .get_conversation(&id)
        .map_err(|e| AppError::NotFound(e.to_string()))?;

    let Some(decision) = ApprovalDecision::parse(&req.decision) else {
        tracing::info!(
            conv_id = %id,
            tool_call_id = %req.tool_call_id,
            raw = %req.decision,
            "Ambiguous decision left undecided"
        );
        return Ok(Json(DecisionResponse::new(DecisionStatus::Undecided)));
    };

    let current = state
        .runtime
        .current_state(&id)
        .await
        .map_err(AppError::Internal)?;
    if let Err(reason) = check_decision(&current, &req.tool_call_id) {
        return Ok(Json(DecisionResponse::ignored(reason.as_str())));
    }

    state
        .runtime
        .send_event(
            &id,
            Event::UserDecision {
                tool_call_id: req.tool_call_id,
                decision,
            },
        )
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(DecisionResponse::new(DecisionStatus::Queued)))
}

// ============================================================
// Registry Info
// ============================================================

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.runtime.tools().descriptors())
}

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let registry = state.runtime.model_registry();
    Json(ModelsResponse {
        models: registry.available_model_info(),
        default: registry.default_model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("confirm-chat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Slug Generation
// ============================================================

fn generate_slug() -> String {
    let now = Local::now();

    let day = match now.weekday() {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    };

    let time = match now.hour() {
        6..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    };

    let words = &[
        "sunny", "cloudy", "misty", "breezy", "frosty", "balmy", "river", "harbor", "summit",
        "meadow", "compass", "lantern", "atlas", "beacon", "falcon", "heron", "maple", "cedar",
        "tide", "ember",
    ];

    let mut rng = rand::thread_rng();
    let adjective = words.choose(&mut rng).unwrap_or(&"clear");
    let noun = words.choose(&mut rng).unwrap_or(&"sky");

    format!("{day}-{time}-{adjective}-{noun}")
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
