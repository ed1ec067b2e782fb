//! Integration tests for the gateway ops backend.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::copilot::CopilotAuthenticator;
use crate::db::{init_database, Repository};
use crate::guardrail::GuardrailClient;
use crate::sessions::MemorySessionStore;
use crate::spend::SpendUpdateQueue;
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

struct FixtureOptions {
    master_key: Option<String>,
    guardrail_base: Option<String>,
    github_base: Option<String>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            master_key: Some("test-master-key".to_string()),
            guardrail_base: None,
            github_base: None,
        }
    }
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_options(FixtureOptions::default()).await
    }

    async fn with_options(options: FixtureOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let token_dir = temp_dir.path().join("copilot");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Create config
        let config = Config {
            master_key: options.master_key.clone(),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            redis_url: None,
            spend_flush_secs: 3600,
            guardrail_api_base: options.guardrail_base.clone(),
            guardrail_api_key: Some("guardrail-key".to_string()),
            copilot_token_dir: token_dir.clone(),
            copilot_client_id: "test-client-id".to_string(),
        };

        let guardrail = options
            .guardrail_base
            .as_ref()
            .map(|base| GuardrailClient::new(base.clone(), config.guardrail_api_key.clone()));

        let copilot = match &options.github_base {
            Some(base) => CopilotAuthenticator::with_endpoints(
                "test-client-id",
                &token_dir,
                base.clone(),
                base.clone(),
            ),
            None => CopilotAuthenticator::new("test-client-id", &token_dir),
        };

        let state = AppState {
            repo,
            spend: SpendUpdateQueue::new(),
            sessions: Arc::new(MemorySessionStore::new()),
            guardrail,
            copilot,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = options.master_key {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Spawn a fake guardrail evaluation API that always answers with the given verdict.
async fn spawn_guardrail_stub(flagged: bool, categories: Vec<&'static str>) -> String {
    let app = Router::new().route(
        "/scan",
        post(move |Json(body): Json<Value>| async move {
            // Echo-check: the hook must forward a messages array.
            assert!(body["messages"].is_array());
            Json(json!({ "flagged": flagged, "categories": categories }))
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Spawn a fake GitHub that authorizes the device immediately.
async fn spawn_github_stub() -> String {
    let app = Router::new()
        .route(
            "/login/device/code",
            post(|| async {
                Json(json!({
                    "device_code": "dc-test",
                    "user_code": "ABCD-1234",
                    "verification_uri": "https://github.com/login/device",
                    "expires_in": 900,
                    "interval": 1
                }))
            }),
        )
        .route(
            "/login/oauth/access_token",
            post(|| async { Json(json!({ "access_token": "gho_test", "token_type": "bearer" })) }),
        )
        .route(
            "/copilot_internal/v2/token",
            get(|| async {
                Json(json!({
                    "token": "copilot-api-key",
                    "expires_at": chrono::Utc::now().timestamp() + 1800
                }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

// ==================== HEALTH & AUTH ====================

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_key() {
    let fixture = TestFixture::new().await;

    // Request without the API key header
    let client = Client::new();
    let resp = client
        .get(fixture.url("/api/spend/logs"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_bearer_token_accepted() {
    let fixture = TestFixture::new().await;

    let client = Client::new();
    let resp = client
        .get(fixture.url("/api/spend/logs"))
        .header("Authorization", "Bearer test-master-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_scim_routes_require_auth() {
    let fixture = TestFixture::new().await;

    let client = Client::new();
    let resp = client
        .get(fixture.url("/scim/v2/Users"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

// ==================== SCIM USERS ====================

#[tokio::test]
async fn test_scim_user_lifecycle() {
    let fixture = TestFixture::new().await;

    // Create
    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Users"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "userName": "alice@example.com",
            "displayName": "Alice",
            "emails": [{ "value": "alice@example.com", "primary": true }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["userName"], "alice@example.com");
    assert_eq!(created["displayName"], "Alice");
    assert_eq!(created["meta"]["resourceType"], "User");

    // Get
    let resp = fixture
        .client
        .get(fixture.url(&format!("/scim/v2/Users/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Update
    let resp = fixture
        .client
        .put(fixture.url(&format!("/scim/v2/Users/{}", id)))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "userName": "alice@example.com",
            "displayName": "Alice Renamed",
            "active": false
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["displayName"], "Alice Renamed");
    assert_eq!(updated["active"], false);

    // Delete
    let resp = fixture
        .client
        .delete(fixture.url(&format!("/scim/v2/Users/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    // Gone
    let resp = fixture
        .client
        .get(fixture.url(&format!("/scim/v2/Users/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(
        err["schemas"][0],
        "urn:ietf:params:scim:api:messages:2.0:Error"
    );
    assert_eq!(err["status"], "404");
}

#[tokio::test]
async fn test_scim_user_duplicate_conflict() {
    let fixture = TestFixture::new().await;

    let user = json!({
        "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
        "id": "u-dup",
        "userName": "dup@example.com"
    });

    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Users"))
        .json(&user)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Users"))
        .json(&user)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["status"], "409");
}

#[tokio::test]
async fn test_scim_user_list_pagination() {
    let fixture = TestFixture::new().await;

    for i in 0..5 {
        let resp = fixture
            .client
            .post(fixture.url("/scim/v2/Users"))
            .json(&json!({
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
                "id": format!("user-{:02}", i),
                "userName": format!("user{}@example.com", i)
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let resp = fixture
        .client
        .get(fixture.url("/scim/v2/Users?startIndex=3&count=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["schemas"][0],
        "urn:ietf:params:scim:api:messages:2.0:ListResponse"
    );
    assert_eq!(body["totalResults"], 5);
    assert_eq!(body["startIndex"], 3);
    assert_eq!(body["itemsPerPage"], 2);
    assert_eq!(body["Resources"][0]["id"], "user-02");
}

// ==================== SCIM GROUPS ====================

#[tokio::test]
async fn test_scim_group_membership_reconciliation() {
    let fixture = TestFixture::new().await;

    // Two users
    for id in ["u1", "u2"] {
        fixture
            .client
            .post(fixture.url("/scim/v2/Users"))
            .json(&json!({
                "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
                "id": id,
                "userName": format!("{}@example.com", id)
            }))
            .send()
            .await
            .unwrap();
    }

    // Group with u1 plus an unknown member that must be skipped
    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Groups"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "id": "team-eng",
            "displayName": "Engineering",
            "members": [{ "value": "u1" }, { "value": "ghost" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let group: Value = resp.json().await.unwrap();
    let members = group["members"].as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["value"], "u1");

    // u1 gained the team
    let user: Value = fixture
        .client
        .get(fixture.url("/scim/v2/Users/u1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(user["groups"][0]["value"], "team-eng");
    assert_eq!(user["groups"][0]["display"], "Engineering");

    // Replace membership with u2: u1 loses the team, u2 gains it
    let resp = fixture
        .client
        .put(fixture.url("/scim/v2/Groups/team-eng"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "displayName": "Engineering",
            "members": [{ "value": "u2" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let u1: Value = fixture
        .client
        .get(fixture.url("/scim/v2/Users/u1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(u1["groups"].as_array().map(|g| g.is_empty()).unwrap_or(true));

    let u2: Value = fixture
        .client
        .get(fixture.url("/scim/v2/Users/u2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(u2["groups"][0]["value"], "team-eng");

    // Delete the group: u2 loses membership
    let resp = fixture
        .client
        .delete(fixture.url("/scim/v2/Groups/team-eng"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let u2: Value = fixture
        .client
        .get(fixture.url("/scim/v2/Users/u2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(u2["groups"].as_array().map(|g| g.is_empty()).unwrap_or(true));
}

#[tokio::test]
async fn test_scim_user_update_preserves_group_membership() {
    let fixture = TestFixture::new().await;

    fixture
        .client
        .post(fixture.url("/scim/v2/Users"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "id": "u1",
            "userName": "u1@example.com"
        }))
        .send()
        .await
        .unwrap();

    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Groups"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "id": "team-eng",
            "displayName": "Engineering",
            "members": [{ "value": "u1" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // IdPs PUT users without the read-only groups attribute. The stored
    // membership must survive the replace.
    let resp = fixture
        .client
        .put(fixture.url("/scim/v2/Users/u1"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "userName": "u1@example.com",
            "displayName": "User One Renamed"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["displayName"], "User One Renamed");
    assert_eq!(updated["groups"][0]["value"], "team-eng");

    // Both sides still agree
    let group: Value = fixture
        .client
        .get(fixture.url("/scim/v2/Groups/team-eng"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(group["members"][0]["value"], "u1");
}

#[tokio::test]
async fn test_scim_group_duplicate_conflict_grants_nothing() {
    let fixture = TestFixture::new().await;

    fixture
        .client
        .post(fixture.url("/scim/v2/Users"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:User"],
            "id": "u9",
            "userName": "u9@example.com"
        }))
        .send()
        .await
        .unwrap();

    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Groups"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "id": "team-x",
            "displayName": "Team X"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Duplicate create naming u9 must be rejected without touching u9
    let resp = fixture
        .client
        .post(fixture.url("/scim/v2/Groups"))
        .json(&json!({
            "schemas": ["urn:ietf:params:scim:schemas:core:2.0:Group"],
            "id": "team-x",
            "displayName": "Team X",
            "members": [{ "value": "u9" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["status"], "409");

    let user: Value = fixture
        .client
        .get(fixture.url("/scim/v2/Users/u9"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(user["groups"]
        .as_array()
        .map(|g| g.is_empty())
        .unwrap_or(true));
}

#[tokio::test]
async fn test_scim_group_not_found() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/scim/v2/Groups/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

// ==================== SPEND ====================

#[tokio::test]
async fn test_spend_track_flush_and_report() {
    let fixture = TestFixture::new().await;

    // Two requests attributed to the same user
    for _ in 0..2 {
        let resp = fixture
            .client
            .post(fixture.url("/api/spend/track"))
            .json(&json!({
                "model": "gpt-4o",
                "userId": "u1",
                "teamId": "t1",
                "spend": 0.01,
                "promptTokens": 100,
                "completionTokens": 40
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert!(body["data"]["requestId"].is_string());
    }

    // Force a flush
    let resp = fixture
        .client
        .post(fixture.url("/api/spend/flush"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    // user + team aggregates
    assert_eq!(body["data"]["entitiesWritten"], 2);

    // Daily report filtered to the user
    let resp = fixture
        .client
        .get(fixture.url("/api/spend/daily?entityType=user&entityId=u1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0]["spend"].as_f64().unwrap() - 0.02).abs() < 1e-9);
    assert_eq!(rows[0]["promptTokens"], 200);
    assert_eq!(rows[0]["apiRequests"], 2);

    // Raw logs
    let resp = fixture
        .client
        .get(fixture.url("/api/spend/logs?limit=10"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_spend_track_validation() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/spend/track"))
        .json(&json!({ "model": "", "spend": 0.01 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .client
        .post(fixture.url("/api/spend/track"))
        .json(&json!({ "model": "gpt-4o", "spend": -1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_spend_daily_unknown_entity_type() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/spend/daily?entityType=org"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ==================== SESSIONS ====================

#[tokio::test]
async fn test_session_append_get_delete() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/sessions/s1"))
        .json(&json!({
            "messages": [
                { "role": "user", "content": "hello" },
                { "role": "assistant", "content": "hi there" }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["storedMessages"], 2);

    let resp = fixture
        .client
        .get(fixture.url("/api/sessions/s1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][1]["content"], "hi there");

    let resp = fixture
        .client
        .delete(fixture.url("/api/sessions/s1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .client
        .get(fixture.url("/api/sessions/s1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_session_trims_to_max_messages() {
    let fixture = TestFixture::new().await;

    let messages: Vec<Value> = (0..5)
        .map(|i| json!({ "role": "user", "content": format!("m{}", i) }))
        .collect();

    let resp = fixture
        .client
        .post(fixture.url("/api/sessions/s1"))
        .json(&json!({ "messages": messages, "maxMessages": 3 }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["storedMessages"], 3);

    let resp = fixture
        .client
        .get(fixture.url("/api/sessions/s1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    // Newest messages survive the trim
    assert_eq!(body["data"][0]["content"], "m2");
    assert_eq!(body["data"][2]["content"], "m4");
}

// ==================== GUARDRAILS ====================

#[tokio::test]
async fn test_guardrail_unconfigured() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/guardrails/check"))
        .json(&json!({ "messages": [{ "role": "user", "content": "hello" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_guardrail_pass() {
    let stub = spawn_guardrail_stub(false, vec![]).await;
    let fixture = TestFixture::with_options(FixtureOptions {
        guardrail_base: Some(stub),
        ..Default::default()
    })
    .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/guardrails/check"))
        .json(&json!({ "messages": [{ "role": "user", "content": "hello" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["flagged"], false);
}

#[tokio::test]
async fn test_guardrail_flagged_blocks() {
    let stub = spawn_guardrail_stub(true, vec!["violence"]).await;
    let fixture = TestFixture::with_options(FixtureOptions {
        guardrail_base: Some(stub),
        ..Default::default()
    })
    .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/guardrails/check"))
        .json(&json!({ "messages": [{ "role": "user", "content": "bad content" }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "GUARDRAIL_FLAGGED");
    assert_eq!(body["error"]["details"]["categories"][0], "violence");
}

// ==================== COPILOT ====================

#[tokio::test]
async fn test_copilot_status_unauthenticated() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/providers/copilot/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["authenticated"], false);
}

#[tokio::test]
async fn test_copilot_device_flow_login() {
    let stub = spawn_github_stub().await;
    let fixture = TestFixture::with_options(FixtureOptions {
        github_base: Some(stub),
        ..Default::default()
    })
    .await;

    let resp = fixture
        .client
        .post(fixture.url("/api/providers/copilot/login"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["userCode"], "ABCD-1234");
    assert!(body["data"]["verificationUri"].is_string());

    // The stub authorizes on the first poll (interval 1s)
    tokio::time::sleep(tokio::time::Duration::from_millis(1500)).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/providers/copilot/status"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["authenticated"], true);

    // With the access token cached, the key exchange works against the stub
    let resp = fixture
        .client
        .get(fixture.url("/api/providers/copilot/key"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["apiKey"], "copilot-api-key");
    assert!(body["data"]["expiresAt"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_copilot_key_without_login_fails() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/providers/copilot/key"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
}
