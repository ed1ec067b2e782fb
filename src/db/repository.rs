//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    DailySpendRow, SpendEntityType, SpendIncrement, SpendLogEntry, SpendLogRow, TeamRecord,
    UserRecord,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== USER OPERATIONS ====================

    /// Count all users.
    pub async fn count_users(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// List users with offset/limit pagination.
    pub async fn list_users(&self, offset: i64, limit: i64) -> Result<Vec<UserRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id, user_email, user_alias, teams, active, created_at, updated_at
             FROM users ORDER BY user_id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(user_from_row).collect())
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query(
            "SELECT user_id, user_email, user_alias, teams, active, created_at, updated_at
             FROM users WHERE user_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Create a new user. Fails with Conflict if the id is taken.
    pub async fn create_user(&self, user: &UserRecord) -> Result<UserRecord, AppError> {
        if self.get_user(&user.user_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "User {} already exists",
                user.user_id
            )));
        }

        let now = Utc::now().to_rfc3339();
        let teams_json = serde_json::to_string(&user.teams).unwrap_or_default();

        sqlx::query(
            "INSERT INTO users (user_id, user_email, user_alias, teams, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.user_id)
        .bind(&user.user_email)
        .bind(&user.user_alias)
        .bind(&teams_json)
        .bind(user.active as i32)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(UserRecord {
            created_at: now.clone(),
            updated_at: now,
            ..user.clone()
        })
    }

    /// Replace a user's mutable fields.
    pub async fn update_user(&self, id: &str, user: &UserRecord) -> Result<UserRecord, AppError> {
        let existing = self
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        let now = Utc::now().to_rfc3339();
        let teams_json = serde_json::to_string(&user.teams).unwrap_or_default();

        sqlx::query(
            "UPDATE users SET user_email = ?, user_alias = ?, teams = ?, active = ?, updated_at = ?
             WHERE user_id = ?",
        )
        .bind(&user.user_email)
        .bind(&user.user_alias)
        .bind(&teams_json)
        .bind(user.active as i32)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(UserRecord {
            user_id: id.to_string(),
            user_email: user.user_email.clone(),
            user_alias: user.user_alias.clone(),
            teams: user.teams.clone(),
            active: user.active,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    /// Replace only a user's team membership list.
    pub async fn update_user_teams(&self, id: &str, teams: &[String]) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let teams_json = serde_json::to_string(teams).unwrap_or_default();

        let result = sqlx::query("UPDATE users SET teams = ?, updated_at = ? WHERE user_id = ?")
            .bind(&teams_json)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    /// Delete a user.
    pub async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }
        Ok(())
    }

    // ==================== TEAM OPERATIONS ====================

    /// Count all teams.
    pub async fn count_teams(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM teams")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// List teams with offset/limit pagination.
    pub async fn list_teams(&self, offset: i64, limit: i64) -> Result<Vec<TeamRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT team_id, team_alias, members, created_at, updated_at
             FROM teams ORDER BY team_id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(team_from_row).collect())
    }

    /// Get a team by ID.
    pub async fn get_team(&self, id: &str) -> Result<Option<TeamRecord>, AppError> {
        let row = sqlx::query(
            "SELECT team_id, team_alias, members, created_at, updated_at
             FROM teams WHERE team_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(team_from_row))
    }

    /// Create a new team. Fails with Conflict if the id is taken.
    pub async fn create_team(&self, team: &TeamRecord) -> Result<TeamRecord, AppError> {
        if self.get_team(&team.team_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Team {} already exists",
                team.team_id
            )));
        }

        let now = Utc::now().to_rfc3339();
        let members_json = serde_json::to_string(&team.members).unwrap_or_default();

        sqlx::query(
            "INSERT INTO teams (team_id, team_alias, members, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&team.team_id)
        .bind(&team.team_alias)
        .bind(&members_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(TeamRecord {
            created_at: now.clone(),
            updated_at: now,
            ..team.clone()
        })
    }

    /// Replace a team's mutable fields.
    pub async fn update_team(&self, id: &str, team: &TeamRecord) -> Result<TeamRecord, AppError> {
        let existing = self
            .get_team(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Team {} not found", id)))?;

        let now = Utc::now().to_rfc3339();
        let members_json = serde_json::to_string(&team.members).unwrap_or_default();

        sqlx::query(
            "UPDATE teams SET team_alias = ?, members = ?, updated_at = ? WHERE team_id = ?",
        )
        .bind(&team.team_alias)
        .bind(&members_json)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(TeamRecord {
            team_id: id.to_string(),
            team_alias: team.team_alias.clone(),
            members: team.members.clone(),
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    /// Delete a team.
    pub async fn delete_team(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM teams WHERE team_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Team {} not found", id)));
        }
        Ok(())
    }

    // ==================== SPEND OPERATIONS ====================

    /// Upsert a batch of aggregated spend increments into daily_spend.
    ///
    /// Runs in a single transaction: either every increment lands or none do.
    /// Returns the number of rows written.
    pub async fn flush_spend(
        &self,
        batch: &[(SpendEntityType, String, SpendIncrement)],
    ) -> Result<u64, AppError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let date = now.format("%Y-%m-%d").to_string();
        let now_str = now.to_rfc3339();

        let mut tx = self.pool.begin().await?;

        for (entity_type, entity_id, inc) in batch {
            sqlx::query(
                r#"INSERT INTO daily_spend
                       (entity_type, entity_id, date, spend, prompt_tokens, completion_tokens, api_requests, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (entity_type, entity_id, date) DO UPDATE SET
                       spend = spend + excluded.spend,
                       prompt_tokens = prompt_tokens + excluded.prompt_tokens,
                       completion_tokens = completion_tokens + excluded.completion_tokens,
                       api_requests = api_requests + excluded.api_requests,
                       updated_at = excluded.updated_at"#,
            )
            .bind(entity_type.as_str())
            .bind(entity_id)
            .bind(&date)
            .bind(inc.spend)
            .bind(inc.prompt_tokens)
            .bind(inc.completion_tokens)
            .bind(inc.api_requests)
            .bind(&now_str)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(batch.len() as u64)
    }

    /// Read daily spend aggregates, optionally filtered by entity and start date.
    pub async fn list_daily_spend(
        &self,
        entity_type: Option<SpendEntityType>,
        entity_id: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<DailySpendRow>, AppError> {
        // Filters are optional; bind placeholders that match everything when absent.
        let rows = sqlx::query(
            r#"SELECT entity_type, entity_id, date, spend, prompt_tokens, completion_tokens, api_requests, updated_at
               FROM daily_spend
               WHERE (? IS NULL OR entity_type = ?)
                 AND (? IS NULL OR entity_id = ?)
                 AND (? IS NULL OR date >= ?)
               ORDER BY date DESC, entity_type, entity_id"#,
        )
        .bind(entity_type.map(|t| t.as_str()))
        .bind(entity_type.map(|t| t.as_str()))
        .bind(entity_id)
        .bind(entity_id)
        .bind(since)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(daily_spend_from_row).collect())
    }

    /// Insert a raw spend log row.
    pub async fn insert_spend_log(&self, entry: &SpendLogEntry) -> Result<SpendLogRow, AppError> {
        let request_id = entry
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO spend_logs
                   (request_id, model, api_key_id, user_id, team_id, end_user_id, spend, prompt_tokens, completion_tokens, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&request_id)
        .bind(&entry.model)
        .bind(&entry.api_key_id)
        .bind(&entry.user_id)
        .bind(&entry.team_id)
        .bind(&entry.end_user_id)
        .bind(entry.spend)
        .bind(entry.prompt_tokens)
        .bind(entry.completion_tokens)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(SpendLogRow {
            request_id,
            model: entry.model.clone(),
            api_key_id: entry.api_key_id.clone(),
            user_id: entry.user_id.clone(),
            team_id: entry.team_id.clone(),
            end_user_id: entry.end_user_id.clone(),
            spend: entry.spend,
            prompt_tokens: entry.prompt_tokens,
            completion_tokens: entry.completion_tokens,
            created_at: now,
        })
    }

    /// List the most recent spend logs.
    pub async fn list_spend_logs(&self, limit: i64) -> Result<Vec<SpendLogRow>, AppError> {
        let rows = sqlx::query(
            r#"SELECT request_id, model, api_key_id, user_id, team_id, end_user_id, spend, prompt_tokens, completion_tokens, created_at
               FROM spend_logs ORDER BY created_at DESC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(spend_log_from_row).collect())
    }
}

// Helper functions for row conversion

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> UserRecord {
    let active: i32 = row.get("active");
    let teams_str: Option<String> = row.get("teams");
    UserRecord {
        user_id: row.get("user_id"),
        user_email: row.get("user_email"),
        user_alias: row.get("user_alias"),
        teams: teams_str.map(|s| parse_json_array(&s)).unwrap_or_default(),
        active: active != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn team_from_row(row: &sqlx::sqlite::SqliteRow) -> TeamRecord {
    let members_str: Option<String> = row.get("members");
    TeamRecord {
        team_id: row.get("team_id"),
        team_alias: row.get("team_alias"),
        members: members_str.map(|s| parse_json_array(&s)).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn daily_spend_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<DailySpendRow> {
    let entity_type: String = row.get("entity_type");
    Some(DailySpendRow {
        entity_type: SpendEntityType::from_str(&entity_type)?,
        entity_id: row.get("entity_id"),
        date: row.get("date"),
        spend: row.get("spend"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        api_requests: row.get("api_requests"),
        updated_at: row.get("updated_at"),
    })
}

fn spend_log_from_row(row: &sqlx::sqlite::SqliteRow) -> SpendLogRow {
    SpendLogRow {
        request_id: row.get("request_id"),
        model: row.get("model"),
        api_key_id: row.get("api_key_id"),
        user_id: row.get("user_id"),
        team_id: row.get("team_id"),
        end_user_id: row.get("end_user_id"),
        spend: row.get("spend"),
        prompt_tokens: row.get("prompt_tokens"),
        completion_tokens: row.get("completion_tokens"),
        created_at: row.get("created_at"),
    }
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
