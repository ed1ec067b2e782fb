//! SCIM v2 transformation helpers.
//!
//! Maps between SCIM User/Group resources and the internal user/team records,
//! applying the default substitutions identity providers rely on (userName as
//! fallback id and email, displayName composed from the name parts).

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    ScimEmail, ScimGroup, ScimMemberRef, ScimMeta, ScimName, ScimUser, TeamRecord, UserRecord,
    SCIM_GROUP_SCHEMA, SCIM_USER_SCHEMA,
};

/// Build an internal user record from an inbound SCIM User.
pub fn user_from_scim(scim: &ScimUser) -> UserRecord {
    let user_id = scim
        .id
        .clone()
        .or_else(|| scim.user_name.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let user_email = scim
        .emails
        .iter()
        .find(|e| e.primary)
        .or_else(|| scim.emails.first())
        .map(|e| e.value.clone())
        .or_else(|| {
            // userName is commonly the email address
            scim.user_name
                .as_ref()
                .filter(|n| n.contains('@'))
                .cloned()
        });

    let user_alias = scim.display_name.clone().or_else(|| {
        scim.name.as_ref().and_then(|n| {
            let parts: Vec<&str> = [n.given_name.as_deref(), n.family_name.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        })
    });

    let now = Utc::now().to_rfc3339();
    UserRecord {
        user_id,
        user_email,
        user_alias,
        // groups is read-only on the User resource; membership is granted
        // through Group resources.
        teams: Vec::new(),
        active: scim.active,
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Render an internal user record as a SCIM User.
pub fn user_to_scim(user: &UserRecord, team_aliases: &[(String, Option<String>)]) -> ScimUser {
    let user_name = user
        .user_email
        .clone()
        .unwrap_or_else(|| user.user_id.clone());

    let display_name = user
        .user_alias
        .clone()
        .or_else(|| user.user_email.clone())
        .unwrap_or_else(|| user.user_id.clone());

    let emails = user
        .user_email
        .iter()
        .map(|e| ScimEmail {
            value: e.clone(),
            primary: true,
        })
        .collect();

    let groups = user
        .teams
        .iter()
        .map(|team_id| ScimMemberRef {
            value: team_id.clone(),
            display: team_aliases
                .iter()
                .find(|(id, _)| id == team_id)
                .and_then(|(_, alias)| alias.clone()),
        })
        .collect();

    ScimUser {
        schemas: vec![SCIM_USER_SCHEMA.to_string()],
        id: Some(user.user_id.clone()),
        user_name: Some(user_name),
        name: user.user_alias.as_ref().map(|alias| ScimName {
            given_name: Some(alias.clone()),
            family_name: Some(String::new()),
        }),
        display_name: Some(display_name),
        emails,
        groups,
        active: user.active,
        meta: Some(ScimMeta {
            resource_type: "User".to_string(),
            created: user.created_at.clone(),
            last_modified: user.updated_at.clone(),
        }),
    }
}

/// Build an internal team record from an inbound SCIM Group.
pub fn team_from_scim(scim: &ScimGroup) -> TeamRecord {
    let team_id = scim
        .id
        .clone()
        .or_else(|| scim.display_name.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let now = Utc::now().to_rfc3339();
    TeamRecord {
        team_id,
        team_alias: scim.display_name.clone(),
        members: scim.members.iter().map(|m| m.value.clone()).collect(),
        created_at: now.clone(),
        updated_at: now,
    }
}

/// Render an internal team record as a SCIM Group.
pub fn team_to_scim(team: &TeamRecord, member_aliases: &[(String, Option<String>)]) -> ScimGroup {
    let members = team
        .members
        .iter()
        .map(|user_id| ScimMemberRef {
            value: user_id.clone(),
            display: member_aliases
                .iter()
                .find(|(id, _)| id == user_id)
                .and_then(|(_, alias)| alias.clone()),
        })
        .collect();

    ScimGroup {
        schemas: vec![SCIM_GROUP_SCHEMA.to_string()],
        id: Some(team.team_id.clone()),
        display_name: team
            .team_alias
            .clone()
            .or_else(|| Some(team.team_id.clone())),
        members,
        meta: Some(ScimMeta {
            resource_type: "Group".to_string(),
            created: team.created_at.clone(),
            last_modified: team.updated_at.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scim_user(json: serde_json::Value) -> ScimUser {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_user_from_scim_prefers_primary_email() {
        let scim = scim_user(serde_json::json!({
            "schemas": [SCIM_USER_SCHEMA],
            "id": "u1",
            "userName": "alice@example.com",
            "emails": [
                { "value": "old@example.com", "primary": false },
                { "value": "alice@example.com", "primary": true }
            ]
        }));

        let user = user_from_scim(&scim);
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.user_email.as_deref(), Some("alice@example.com"));
        assert!(user.active);
    }

    #[test]
    fn test_user_from_scim_username_fallbacks() {
        // No id: userName becomes the id. No emails: userName with '@' becomes the email.
        let scim = scim_user(serde_json::json!({
            "schemas": [SCIM_USER_SCHEMA],
            "userName": "bob@example.com"
        }));

        let user = user_from_scim(&scim);
        assert_eq!(user.user_id, "bob@example.com");
        assert_eq!(user.user_email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn test_user_from_scim_non_email_username_not_used_as_email() {
        let scim = scim_user(serde_json::json!({
            "schemas": [SCIM_USER_SCHEMA],
            "userName": "bob"
        }));

        let user = user_from_scim(&scim);
        assert_eq!(user.user_id, "bob");
        assert!(user.user_email.is_none());
    }

    #[test]
    fn test_user_from_scim_alias_from_name_parts() {
        let scim = scim_user(serde_json::json!({
            "schemas": [SCIM_USER_SCHEMA],
            "userName": "carol",
            "name": { "givenName": "Carol", "familyName": "Jones" }
        }));

        let user = user_from_scim(&scim);
        assert_eq!(user.user_alias.as_deref(), Some("Carol Jones"));
    }

    #[test]
    fn test_user_from_scim_display_name_wins_over_name_parts() {
        let scim = scim_user(serde_json::json!({
            "schemas": [SCIM_USER_SCHEMA],
            "userName": "carol",
            "displayName": "CJ",
            "name": { "givenName": "Carol", "familyName": "Jones" }
        }));

        let user = user_from_scim(&scim);
        assert_eq!(user.user_alias.as_deref(), Some("CJ"));
    }

    #[test]
    fn test_user_from_scim_ignores_readonly_groups() {
        let scim = scim_user(serde_json::json!({
            "schemas": [SCIM_USER_SCHEMA],
            "userName": "dave",
            "groups": [
                { "value": "team-a", "display": "Team A" },
                { "value": "team-b" }
            ]
        }));

        let user = user_from_scim(&scim);
        assert!(user.teams.is_empty());
    }

    #[test]
    fn test_user_to_scim_round_fills_defaults() {
        let now = Utc::now().to_rfc3339();
        let user = UserRecord {
            user_id: "u1".to_string(),
            user_email: None,
            user_alias: None,
            teams: vec![],
            active: true,
            created_at: now.clone(),
            updated_at: now,
        };

        let scim = user_to_scim(&user, &[]);
        // With neither email nor alias, the id stands in for both.
        assert_eq!(scim.user_name.as_deref(), Some("u1"));
        assert_eq!(scim.display_name.as_deref(), Some("u1"));
        assert!(scim.emails.is_empty());
        assert_eq!(scim.meta.unwrap().resource_type, "User");
    }

    #[test]
    fn test_user_to_scim_group_display_from_aliases() {
        let now = Utc::now().to_rfc3339();
        let user = UserRecord {
            user_id: "u1".to_string(),
            user_email: Some("u1@example.com".to_string()),
            user_alias: Some("User One".to_string()),
            teams: vec!["t1".to_string()],
            active: true,
            created_at: now.clone(),
            updated_at: now,
        };

        let scim = user_to_scim(&user, &[("t1".to_string(), Some("Team One".to_string()))]);
        assert_eq!(scim.groups.len(), 1);
        assert_eq!(scim.groups[0].display.as_deref(), Some("Team One"));
    }

    #[test]
    fn test_team_transforms() {
        let scim: ScimGroup = serde_json::from_value(serde_json::json!({
            "schemas": [SCIM_GROUP_SCHEMA],
            "displayName": "Engineering",
            "members": [{ "value": "u1" }, { "value": "u2" }]
        }))
        .unwrap();

        let team = team_from_scim(&scim);
        // No id: displayName stands in.
        assert_eq!(team.team_id, "Engineering");
        assert_eq!(team.members, vec!["u1", "u2"]);

        let back = team_to_scim(&team, &[("u1".to_string(), Some("User One".to_string()))]);
        assert_eq!(back.display_name.as_deref(), Some("Engineering"));
        assert_eq!(back.members[0].display.as_deref(), Some("User One"));
        assert!(back.members[1].display.is_none());
    }
}
