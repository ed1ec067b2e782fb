//! Guardrail check API endpoint.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::guardrail::ScanResult;
use crate::models::ChatMessage;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GuardrailCheckRequest {
    pub messages: Vec<ChatMessage>,
}

/// POST /api/guardrails/check - Scan a message list before the gateway
/// forwards it upstream. A flagged verdict fails the request with 400 so the
/// caller treats it as a block.
pub async fn check_guardrail(
    State(state): State<AppState>,
    Json(request): Json<GuardrailCheckRequest>,
) -> ApiResult<ScanResult> {
    let Some(client) = &state.guardrail else {
        return Err(AppError::BadRequest(
            "Guardrail API is not configured".to_string(),
        ));
    };

    let result = client.scan(&request.messages).await?;

    if result.flagged {
        return Err(AppError::GuardrailFlagged {
            categories: result.categories,
        });
    }

    success(result)
}
