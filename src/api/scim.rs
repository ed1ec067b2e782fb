//! SCIM v2 provisioning endpoints.
//!
//! Unlike the `/api` surface these speak raw SCIM JSON: list envelopes, error
//! bodies, and status codes follow RFC 7644 so identity providers can consume
//! them directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{ScimError, ScimGroup, ScimListResponse, ScimUser};
use crate::scim::{team_from_scim, team_to_scim, user_from_scim, user_to_scim};
use crate::AppState;

/// SCIM error with its HTTP status, rendered as an RFC 7644 error body.
pub struct ScimErrorResponse {
    status: StatusCode,
    detail: String,
}

impl ScimErrorResponse {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<AppError> for ScimErrorResponse {
    fn from(err: AppError) -> Self {
        Self::new(err.status_code(), err.message())
    }
}

impl IntoResponse for ScimErrorResponse {
    fn into_response(self) -> Response {
        let body = ScimError::new(self.status.as_u16(), self.detail);
        (self.status, Json(body)).into_response()
    }
}

type ScimResult<T> = Result<T, ScimErrorResponse>;

/// SCIM pagination parameters (1-based startIndex per RFC 7644).
#[derive(Debug, Deserialize)]
pub struct ScimPageQuery {
    #[serde(rename = "startIndex", default)]
    pub start_index: Option<i64>,
    #[serde(default)]
    pub count: Option<i64>,
}

impl ScimPageQuery {
    fn normalize(&self) -> (i64, i64) {
        let start_index = self.start_index.unwrap_or(1).max(1);
        let count = self.count.unwrap_or(50).clamp(0, 1000);
        (start_index, count)
    }
}

async fn team_aliases(state: &AppState) -> Result<Vec<(String, Option<String>)>, AppError> {
    let teams = state.repo.list_teams(0, i64::MAX).await?;
    Ok(teams
        .into_iter()
        .map(|t| (t.team_id, t.team_alias))
        .collect())
}

async fn user_aliases(state: &AppState) -> Result<Vec<(String, Option<String>)>, AppError> {
    let users = state.repo.list_users(0, i64::MAX).await?;
    Ok(users
        .into_iter()
        .map(|u| (u.user_id, u.user_alias))
        .collect())
}

// ==================== USERS ====================

/// GET /scim/v2/Users - List users.
pub async fn list_scim_users(
    State(state): State<AppState>,
    Query(page): Query<ScimPageQuery>,
) -> ScimResult<Json<ScimListResponse<ScimUser>>> {
    let (start_index, count) = page.normalize();

    let total = state.repo.count_users().await?;
    let users = state.repo.list_users(start_index - 1, count).await?;
    let aliases = team_aliases(&state).await?;

    let resources = users.iter().map(|u| user_to_scim(u, &aliases)).collect();
    Ok(Json(ScimListResponse::new(total, start_index, resources)))
}

/// GET /scim/v2/Users/:id - Get a single user.
pub async fn get_scim_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ScimResult<Json<ScimUser>> {
    let user = state.repo.get_user(&id).await?.ok_or_else(|| {
        ScimErrorResponse::new(StatusCode::NOT_FOUND, format!("User {} not found", id))
    })?;

    let aliases = team_aliases(&state).await?;
    Ok(Json(user_to_scim(&user, &aliases)))
}

/// POST /scim/v2/Users - Create a user.
pub async fn create_scim_user(
    State(state): State<AppState>,
    Json(scim): Json<ScimUser>,
) -> ScimResult<(StatusCode, Json<ScimUser>)> {
    if scim.user_name.is_none() && scim.id.is_none() {
        return Err(ScimErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "Either id or userName is required",
        ));
    }

    let user = user_from_scim(&scim);
    let created = state.repo.create_user(&user).await?;

    let aliases = team_aliases(&state).await?;
    Ok((StatusCode::CREATED, Json(user_to_scim(&created, &aliases))))
}

/// PUT /scim/v2/Users/:id - Replace a user's attributes.
///
/// The `groups` attribute is read-only on the User resource (RFC 7643), so
/// the stored team memberships are carried over unchanged. Groups own
/// membership through `reconcile_members`.
pub async fn update_scim_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(scim): Json<ScimUser>,
) -> ScimResult<Json<ScimUser>> {
    let existing = state.repo.get_user(&id).await?.ok_or_else(|| {
        ScimErrorResponse::new(StatusCode::NOT_FOUND, format!("User {} not found", id))
    })?;

    let mut user = user_from_scim(&scim);
    user.teams = existing.teams;

    let updated = state.repo.update_user(&id, &user).await?;

    let aliases = team_aliases(&state).await?;
    Ok(Json(user_to_scim(&updated, &aliases)))
}

/// DELETE /scim/v2/Users/:id - Delete a user.
pub async fn delete_scim_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ScimResult<StatusCode> {
    state.repo.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==================== GROUPS ====================

/// GET /scim/v2/Groups - List groups.
pub async fn list_scim_groups(
    State(state): State<AppState>,
    Query(page): Query<ScimPageQuery>,
) -> ScimResult<Json<ScimListResponse<ScimGroup>>> {
    let (start_index, count) = page.normalize();

    let total = state.repo.count_teams().await?;
    let teams = state.repo.list_teams(start_index - 1, count).await?;
    let aliases = user_aliases(&state).await?;

    let resources = teams.iter().map(|t| team_to_scim(t, &aliases)).collect();
    Ok(Json(ScimListResponse::new(total, start_index, resources)))
}

/// GET /scim/v2/Groups/:id - Get a single group.
pub async fn get_scim_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ScimResult<Json<ScimGroup>> {
    let team = state.repo.get_team(&id).await?.ok_or_else(|| {
        ScimErrorResponse::new(StatusCode::NOT_FOUND, format!("Group {} not found", id))
    })?;

    let aliases = user_aliases(&state).await?;
    Ok(Json(team_to_scim(&team, &aliases)))
}

/// POST /scim/v2/Groups - Create a group and grant membership.
pub async fn create_scim_group(
    State(state): State<AppState>,
    Json(scim): Json<ScimGroup>,
) -> ScimResult<(StatusCode, Json<ScimGroup>)> {
    let mut team = team_from_scim(&scim);

    // Reject duplicates before touching membership so a 409 leaves the
    // users' team lists untouched.
    if state.repo.get_team(&team.team_id).await?.is_some() {
        return Err(ScimErrorResponse::new(
            StatusCode::CONFLICT,
            format!("Team {} already exists", team.team_id),
        ));
    }

    team.members = reconcile_members(&state, &team.team_id, &team.members, &[]).await?;

    let created = state.repo.create_team(&team).await?;

    let aliases = user_aliases(&state).await?;
    Ok((StatusCode::CREATED, Json(team_to_scim(&created, &aliases))))
}

/// PUT /scim/v2/Groups/:id - Replace a group, reconciling membership.
pub async fn update_scim_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(scim): Json<ScimGroup>,
) -> ScimResult<Json<ScimGroup>> {
    let existing = state.repo.get_team(&id).await?.ok_or_else(|| {
        ScimErrorResponse::new(StatusCode::NOT_FOUND, format!("Group {} not found", id))
    })?;

    let mut team = team_from_scim(&scim);
    team.members = reconcile_members(&state, &id, &team.members, &existing.members).await?;

    let updated = state.repo.update_team(&id, &team).await?;

    let aliases = user_aliases(&state).await?;
    Ok(Json(team_to_scim(&updated, &aliases)))
}

/// DELETE /scim/v2/Groups/:id - Delete a group and revoke membership.
pub async fn delete_scim_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ScimResult<StatusCode> {
    let existing = state.repo.get_team(&id).await?.ok_or_else(|| {
        ScimErrorResponse::new(StatusCode::NOT_FOUND, format!("Group {} not found", id))
    })?;

    // Revoke the team from every remaining member before dropping it.
    reconcile_members(&state, &id, &[], &existing.members).await?;
    state.repo.delete_team(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Apply a group's membership change to the affected users' `teams` lists.
///
/// Users gaining membership get the team id appended; users losing it get it
/// removed. Member ids that do not resolve to a user are skipped with a
/// warning and excluded from the stored member list. Returns the members that
/// were actually granted.
async fn reconcile_members(
    state: &AppState,
    team_id: &str,
    new_members: &[String],
    old_members: &[String],
) -> Result<Vec<String>, AppError> {
    let mut granted = Vec::new();

    for user_id in new_members {
        match state.repo.get_user(user_id).await? {
            Some(user) => {
                if !user.teams.iter().any(|t| t == team_id) {
                    let mut teams = user.teams.clone();
                    teams.push(team_id.to_string());
                    state.repo.update_user_teams(user_id, &teams).await?;
                }
                granted.push(user_id.clone());
            }
            None => {
                tracing::warn!("Skipping unknown member {} for group {}", user_id, team_id);
            }
        }
    }

    for user_id in old_members {
        if new_members.contains(user_id) {
            continue;
        }
        if let Some(user) = state.repo.get_user(user_id).await? {
            let teams: Vec<String> = user
                .teams
                .iter()
                .filter(|t| t.as_str() != team_id)
                .cloned()
                .collect();
            if teams.len() != user.teams.len() {
                state.repo.update_user_teams(user_id, &teams).await?;
            }
        }
    }

    Ok(granted)
}
