//! HTTP surface: the chat gateway pushes inbound events here, and a health
//! endpoint backs deployment probes. Everything else happens inside the
//! lifecycle coordinator.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde::Deserialize;
use std::sync::Arc;

use crate::lifecycle::{Coordinator, InboundMessage};
use crate::transport::QuotedMessage;

pub struct AppState {
    pub coordinator: Coordinator,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook/message", post(receive_message))
        .route("/webhook/message-edit", post(receive_edit))
        .route("/api/config/reload", post(reload_config))
        .with_state(state)
}

async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "healthy" })),
    )
}

/// Wire form of an inbound chat message, as the gateway posts it.
#[derive(Debug, Deserialize)]
struct WebhookMessage {
    channel: String,
    sender: String,
    #[serde(default)]
    text: String,
    message_id: String,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    mentions: Vec<String>,
    quoted: Option<WebhookQuoted>,
    media: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookQuoted {
    #[serde(default)]
    text: String,
    unique_id: Option<String>,
    original_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEdit {
    original_msg_id: String,
    new_text: String,
}

async fn receive_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookMessage>,
) -> StatusCode {
    debug!(
        "inbound message {} from {} in {}",
        payload.message_id, payload.sender, payload.channel
    );

    let msg = InboundMessage {
        channel: payload.channel,
        sender: payload.sender,
        text: payload.text,
        message_id: payload.message_id,
        is_group: payload.is_group,
        mentions: payload.mentions,
        quoted: payload.quoted.map(|q| QuotedMessage {
            text: q.text,
            unique_id: q.unique_id,
            original_id: q.original_id,
        }),
        media: payload.media,
    };

    // Errors are already reported to the requesting chat by the coordinator.
    state.coordinator.handle_message(&msg).await;
    StatusCode::OK
}

async fn receive_edit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookEdit>,
) -> StatusCode {
    if let Err(e) = state
        .coordinator
        .reconcile_edit(&payload.original_msg_id, &payload.new_text)
        .await
    {
        log::error!("edit reconciliation failed: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

/// Re-reads the keyword file and the user directory from disk and swaps the
/// in-memory snapshots.
async fn reload_config(State(state): State<Arc<AppState>>) -> StatusCode {
    state.coordinator.reload_snapshots();
    info!("keyword and directory snapshots reloaded");
    StatusCode::OK
}
