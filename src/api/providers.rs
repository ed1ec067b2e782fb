//! Provider credential API endpoints (GitHub Copilot).

use axum::extract::State;
use serde::Serialize;

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotLoginResponse {
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
}

/// POST /api/providers/copilot/login - Start the device flow.
///
/// Returns the code for the user to enter and polls GitHub in the background;
/// the access token lands in the token cache once the user authorizes.
pub async fn copilot_login(State(state): State<AppState>) -> ApiResult<CopilotLoginResponse> {
    let device = state.copilot.start_login().await.map_err(AppError::from)?;

    let authenticator = state.copilot.clone();
    let device_code = device.device_code.clone();
    let interval = device.interval;
    let expires_in = device.expires_in;
    tokio::spawn(async move {
        match authenticator
            .poll_access_token(&device_code, interval, expires_in)
            .await
        {
            Ok(()) => tracing::info!("Copilot device flow completed"),
            Err(e) => tracing::warn!("Copilot device flow failed: {}", e),
        }
    });

    success(CopilotLoginResponse {
        user_code: device.user_code,
        verification_uri: device.verification_uri,
        expires_in: device.expires_in,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotKeyResponse {
    pub api_key: String,
    pub expires_at: i64,
}

/// GET /api/providers/copilot/key - Return a valid Copilot API key,
/// refreshing it from the cached access token when close to expiry.
pub async fn copilot_key(State(state): State<AppState>) -> ApiResult<CopilotKeyResponse> {
    let key = state.copilot.get_api_key().await.map_err(AppError::from)?;
    success(CopilotKeyResponse {
        api_key: key.api_key,
        expires_at: key.expires_at,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotStatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_expires_at: Option<i64>,
}

/// GET /api/providers/copilot/status - Report cached credential state.
pub async fn copilot_status(State(state): State<AppState>) -> ApiResult<CopilotStatusResponse> {
    let (authenticated, api_key_expires_at) = state.copilot.status().await;
    success(CopilotStatusResponse {
        authenticated,
        api_key_expires_at,
    })
}
