//! Internal user record provisioned via SCIM.

use serde::{Deserialize, Serialize};

/// A gateway user as stored in the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_alias: Option<String>,
    /// Team ids this user belongs to
    #[serde(default)]
    pub teams: Vec<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}
