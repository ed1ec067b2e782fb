//! Session cache API endpoints.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::models::ChatMessage;
use crate::sessions::{DEFAULT_MAX_MESSAGES, DEFAULT_TTL_SECS};
use crate::AppState;

/// GET /api/sessions/:id - Read a session's messages.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ChatMessage>> {
    let messages = state.sessions.get(&id).await?;
    success(messages)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSessionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSessionResponse {
    pub session_id: String,
    pub stored_messages: usize,
}

/// POST /api/sessions/:id - Append messages, trimming to the cap.
pub async fn append_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AppendSessionRequest>,
) -> ApiResult<AppendSessionResponse> {
    let ttl = Duration::from_secs(request.ttl_secs.unwrap_or(DEFAULT_TTL_SECS));
    let max_messages = request.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES).max(1);

    let stored_messages = state
        .sessions
        .append(&id, &request.messages, ttl, max_messages)
        .await?;

    success(AppendSessionResponse {
        session_id: id,
        stored_messages,
    })
}

/// DELETE /api/sessions/:id - Drop a session.
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.sessions.delete(&id).await?;
    success(())
}
