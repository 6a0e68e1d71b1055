//! Server-Sent Events support

use super::types::TurnView;
use crate::runtime::SseEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream
pub fn sse_stream(
    init_event: SseEvent,
    broadcast_rx: tokio::sync::broadcast::Receiver<SseEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Create stream that starts with init event then broadcasts
    let init = futures::stream::once(async move { Ok(sse_event_to_axum(init_event)) });

    let broadcasts = broadcast_payloads(broadcast_rx)
        .map(|(event_type, data)| Ok(Event::default().event(event_type).data(data.to_string())));

    let combined = init.chain(broadcasts);

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Payloads for every broadcast. A subscriber that fell behind gets a
/// `resync` notice in place of the events it missed and must refetch the
/// conversation to catch up.
fn broadcast_payloads(
    broadcast_rx: tokio::sync::broadcast::Receiver<SseEvent>,
) -> impl Stream<Item = (&'static str, Value)> {
    BroadcastStream::new(broadcast_rx).map(|result| match result {
        Ok(event) => sse_payload(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE subscriber lagged");
            (
                "resync",
                json!({
                    "type": "resync",
                    "skipped": skipped
                }),
            )
        }
    })
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = sse_payload(event);
    Event::default().event(event_type).data(data.to_string())
}

/// Event name and JSON body for one broadcast
fn sse_payload(event: SseEvent) -> (&'static str, Value) {
    match event {
        SseEvent::Init {
            conversation,
            turns,
            has_pending_confirmation,
        } => {
            let agent_working = conversation.is_agent_working();
            let turns: Vec<TurnView> = turns.into_iter().map(TurnView::from).collect();
            (
                "init",
                json!({
                    "type": "init",
                    "conversation": conversation,
                    "turns": turns,
                    "agent_working": agent_working,
                    "has_pending_confirmation": has_pending_confirmation
                }),
            )
        }
        SseEvent::TurnAppended { turn, views } => (
            "turn",
            json!({
                "type": "turn",
                "turn": TurnView { turn, views }
            }),
        ),
        SseEvent::PartUpdated {
            turn_id,
            part,
            view,
        } => (
            "part_updated",
            json!({
                "type": "part_updated",
                "turn_id": turn_id,
                "part": part,
                "view": view
            }),
        ),
        SseEvent::ToolResult {
            tool_call_id,
            result,
        } => (
            "tool_result",
            json!({
                "type": "tool_result",
                "tool_call_id": tool_call_id,
                "result": result
            }),
        ),
        SseEvent::StateChange { state } => (
            "state_change",
            json!({
                "type": "state_change",
                "state": state
            }),
        ),
        SseEvent::ConfirmationRequired { request } => (
            "confirmation_required",
            json!({
                "type": "confirmation_required",
                "request": request
            }),
        ),
        SseEvent::DecisionIgnored { notice } => (
            "decision_ignored",
            json!({
                "type": "decision_ignored",
                "notice": notice
            }),
        ),
        SseEvent::AgentDone => (
            "agent_done",
            json!({
                "type": "agent_done"
            }),
        ),
        SseEvent::Error { message } => (
            "error",
            json!({
                "type": "error",
                "message": message
            }),
        ),
    }
}
