//! Internal team record provisioned via SCIM groups.

use serde::{Deserialize, Serialize};

/// A gateway team as stored in the `teams` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRecord {
    pub team_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_alias: Option<String>,
    /// User ids belonging to this team
    #[serde(default)]
    pub members: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}
