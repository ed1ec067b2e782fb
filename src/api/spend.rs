//! Spend tracking API endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{DailySpendRow, SpendEntityType, SpendLogEntry, SpendLogRow};
use crate::AppState;

/// POST /api/spend/track - Log a request's spend and enqueue its increments.
pub async fn track_spend(
    State(state): State<AppState>,
    Json(entry): Json<SpendLogEntry>,
) -> ApiResult<SpendLogRow> {
    if entry.model.trim().is_empty() {
        return Err(AppError::Validation("Model is required".to_string()));
    }
    if entry.spend < 0.0 {
        return Err(AppError::Validation("Spend cannot be negative".to_string()));
    }

    let row = state.spend.log_request(&state.repo, &entry).await?;
    success(row)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushResult {
    pub entities_written: u64,
}

/// POST /api/spend/flush - Force a flush of pending increments.
pub async fn flush_spend(State(state): State<AppState>) -> ApiResult<FlushResult> {
    let entities_written = state.spend.flush(&state.repo).await?;
    success(FlushResult { entities_written })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySpendQuery {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Inclusive start date, YYYY-MM-DD
    #[serde(default)]
    pub since: Option<String>,
}

/// GET /api/spend/daily - Read daily spend aggregates.
pub async fn get_daily_spend(
    State(state): State<AppState>,
    Query(query): Query<DailySpendQuery>,
) -> ApiResult<Vec<DailySpendRow>> {
    let entity_type = match &query.entity_type {
        Some(raw) => Some(SpendEntityType::from_str(raw).ok_or_else(|| {
            AppError::Validation(format!("Unknown entity type: {}", raw))
        })?),
        None => None,
    };

    let rows = state
        .repo
        .list_daily_spend(entity_type, query.entity_id.as_deref(), query.since.as_deref())
        .await?;
    success(rows)
}

#[derive(Debug, Deserialize)]
pub struct SpendLogsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /api/spend/logs - List recent spend logs.
pub async fn list_spend_logs(
    State(state): State<AppState>,
    Query(query): Query<SpendLogsQuery>,
) -> ApiResult<Vec<SpendLogRow>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    let logs = state.repo.list_spend_logs(limit).await?;
    success(logs)
}
