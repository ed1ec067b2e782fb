//! Spend tracking models.

use serde::{Deserialize, Serialize};

/// The kind of entity a spend increment is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendEntityType {
    Key,
    User,
    Team,
    EndUser,
}

impl SpendEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpendEntityType::Key => "key",
            SpendEntityType::User => "user",
            SpendEntityType::Team => "team",
            SpendEntityType::EndUser => "end_user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "key" => Some(SpendEntityType::Key),
            "user" => Some(SpendEntityType::User),
            "team" => Some(SpendEntityType::Team),
            "end_user" => Some(SpendEntityType::EndUser),
            _ => None,
        }
    }
}

/// Pending spend counters for one entity, merged additively before flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendIncrement {
    pub spend: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub api_requests: i64,
}

impl SpendIncrement {
    /// Merge another increment into this one.
    pub fn merge(&mut self, other: &SpendIncrement) {
        self.spend += other.spend;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.api_requests += other.api_requests;
    }

    /// True when every counter is zero.
    pub fn is_zero(&self) -> bool {
        self.spend == 0.0
            && self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.api_requests == 0
    }
}

/// One aggregated row in the `daily_spend` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySpendRow {
    pub entity_type: SpendEntityType,
    pub entity_id: String,
    /// UTC date in YYYY-MM-DD
    pub date: String,
    pub spend: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub api_requests: i64,
    pub updated_at: String,
}

/// A raw spend log for one completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendLogEntry {
    #[serde(default)]
    pub request_id: Option<String>,
    pub model: String,
    #[serde(default)]
    pub api_key_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub end_user_id: Option<String>,
    pub spend: f64,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
}

/// A stored spend log row, timestamped at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendLogRow {
    pub request_id: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_id: Option<String>,
    pub spend: f64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub created_at: String,
}
