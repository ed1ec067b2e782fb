//! GitHub Copilot authentication via the OAuth device-authorization grant.
//!
//! Two-stage flow: the device flow yields a long-lived OAuth access token,
//! which is then exchanged for a short-lived Copilot API key. Both are cached
//! on disk under the configured token directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const DEVICE_CODE_PATH: &str = "/login/device/code";
const ACCESS_TOKEN_PATH: &str = "/login/oauth/access_token";
const API_KEY_PATH: &str = "/copilot_internal/v2/token";

const ACCESS_TOKEN_FILE: &str = "access-token.json";
const API_KEY_FILE: &str = "api-key.json";

/// Refresh the API key this many seconds before it actually expires.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Copilot authentication failures, named for the flow step that failed.
#[derive(Debug)]
pub enum CopilotError {
    /// Device code request failed
    GetDeviceCode(String),
    /// Access token polling failed or was denied
    GetAccessToken(String),
    /// API key exchange failed
    RefreshApiKey(String),
    /// Device flow timed out waiting for the user
    TokenExpired,
    /// Token cache file I/O failed
    Io(String),
}

impl std::fmt::Display for CopilotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopilotError::GetDeviceCode(msg) => write!(f, "Device code request failed: {}", msg),
            CopilotError::GetAccessToken(msg) => write!(f, "Access token request failed: {}", msg),
            CopilotError::RefreshApiKey(msg) => write!(f, "API key refresh failed: {}", msg),
            CopilotError::TokenExpired => write!(f, "Device authorization expired"),
            CopilotError::Io(msg) => write!(f, "Token cache I/O failed: {}", msg),
        }
    }
}

impl std::error::Error for CopilotError {}

impl From<CopilotError> for AppError {
    fn from(err: CopilotError) -> Self {
        match err {
            CopilotError::Io(msg) => AppError::Internal(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

/// Response from the device authorization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct AccessTokenSuccess {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenPending {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AccessTokenResponse {
    Success(AccessTokenSuccess),
    Pending(AccessTokenPending),
}

/// Cached OAuth access token.
#[derive(Debug, Serialize, Deserialize)]
struct AccessTokenFile {
    access_token: String,
}

/// Cached Copilot API key with its expiry (unix seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyFile {
    pub api_key: String,
    pub expires_at: i64,
}

/// Response from the Copilot API key exchange endpoint.
#[derive(Debug, Deserialize)]
struct ApiKeyResponse {
    token: String,
    expires_at: i64,
}

/// Authenticates against GitHub Copilot and caches tokens on disk.
#[derive(Clone)]
pub struct CopilotAuthenticator {
    client: reqwest::Client,
    client_id: String,
    token_dir: PathBuf,
    /// Base URL for the OAuth endpoints (github.com in production)
    github_base: String,
    /// Base URL for the API key exchange (api.github.com in production)
    api_base: String,
}

impl CopilotAuthenticator {
    pub fn new(client_id: impl Into<String>, token_dir: impl Into<PathBuf>) -> Self {
        Self::with_endpoints(
            client_id,
            token_dir,
            "https://github.com",
            "https://api.github.com",
        )
    }

    /// Constructor with explicit endpoint bases, used by tests to point the
    /// flow at a local fake.
    pub fn with_endpoints(
        client_id: impl Into<String>,
        token_dir: impl Into<PathBuf>,
        github_base: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            token_dir: token_dir.into(),
            github_base: github_base.into(),
            api_base: api_base.into(),
        }
    }

    /// Request a device code to present to the user.
    pub async fn start_login(&self) -> Result<DeviceCodeResponse, CopilotError> {
        let response = self
            .client
            .post(format!("{}{}", self.github_base, DEVICE_CODE_PATH))
            .header("Accept", "application/json")
            .form(&[("client_id", self.client_id.as_str()), ("scope", "read:user")])
            .send()
            .await
            .map_err(|e| CopilotError::GetDeviceCode(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::GetDeviceCode(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CopilotError::GetDeviceCode(e.to_string()))
    }

    /// Poll the token endpoint until the user authorizes the device code,
    /// then persist the access token. Honors `slow_down` per RFC 8628.
    pub async fn poll_access_token(
        &self,
        device_code: &str,
        interval: u64,
        expires_in: u64,
    ) -> Result<(), CopilotError> {
        let mut poll_interval = Duration::from_secs(interval.max(1));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(expires_in);

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(CopilotError::TokenExpired);
            }

            tokio::time::sleep(poll_interval).await;

            let response = self
                .client
                .post(format!("{}{}", self.github_base, ACCESS_TOKEN_PATH))
                .header("Accept", "application/json")
                .form(&[
                    ("client_id", self.client_id.as_str()),
                    ("device_code", device_code),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ])
                .send()
                .await
                .map_err(|e| CopilotError::GetAccessToken(e.to_string()))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| CopilotError::GetAccessToken(e.to_string()))?;

            // GitHub reports pending states with 200; a 400 carries the same shape.
            if !status.is_success() && status.as_u16() != 400 {
                return Err(CopilotError::GetAccessToken(format!(
                    "HTTP {}: {}",
                    status, body
                )));
            }

            match serde_json::from_str::<AccessTokenResponse>(&body) {
                Ok(AccessTokenResponse::Success(success)) => {
                    self.write_token_file(
                        ACCESS_TOKEN_FILE,
                        &AccessTokenFile {
                            access_token: success.access_token,
                        },
                    )
                    .await?;
                    return Ok(());
                }
                Ok(AccessTokenResponse::Pending(pending)) => match pending.error.as_str() {
                    "authorization_pending" => continue,
                    "slow_down" => {
                        poll_interval += Duration::from_secs(5);
                        continue;
                    }
                    "expired_token" => return Err(CopilotError::TokenExpired),
                    "access_denied" => {
                        return Err(CopilotError::GetAccessToken(
                            "User denied authorization".to_string(),
                        ))
                    }
                    other => {
                        return Err(CopilotError::GetAccessToken(format!(
                            "{}: {}",
                            other,
                            pending.error_description.unwrap_or_default()
                        )))
                    }
                },
                Err(e) => {
                    return Err(CopilotError::GetAccessToken(format!(
                        "Unparseable token response: {} - {}",
                        e, body
                    )))
                }
            }
        }
    }

    /// Return a valid Copilot API key, exchanging the cached access token for
    /// a fresh one when the cached key is missing or close to expiry.
    pub async fn get_api_key(&self) -> Result<ApiKeyFile, CopilotError> {
        if let Some(cached) = self.read_token_file::<ApiKeyFile>(API_KEY_FILE).await {
            if cached.expires_at - EXPIRY_MARGIN_SECS > Utc::now().timestamp() {
                return Ok(cached);
            }
        }

        let access_token = self
            .read_token_file::<AccessTokenFile>(ACCESS_TOKEN_FILE)
            .await
            .ok_or_else(|| {
                CopilotError::GetAccessToken("No cached access token; log in first".to_string())
            })?
            .access_token;

        let response = self
            .client
            .get(format!("{}{}", self.api_base, API_KEY_PATH))
            .header("Accept", "application/json")
            .header("Authorization", format!("token {}", access_token))
            .send()
            .await
            .map_err(|e| CopilotError::RefreshApiKey(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::RefreshApiKey(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let key: ApiKeyResponse = response
            .json()
            .await
            .map_err(|e| CopilotError::RefreshApiKey(e.to_string()))?;

        let file = ApiKeyFile {
            api_key: key.token,
            expires_at: key.expires_at,
        };
        self.write_token_file(API_KEY_FILE, &file).await?;

        Ok(file)
    }

    /// Report whether an access token is cached and when the API key expires.
    pub async fn status(&self) -> (bool, Option<i64>) {
        let authenticated = self
            .read_token_file::<AccessTokenFile>(ACCESS_TOKEN_FILE)
            .await
            .is_some();
        let expires_at = self
            .read_token_file::<ApiKeyFile>(API_KEY_FILE)
            .await
            .map(|k| k.expires_at);
        (authenticated, expires_at)
    }

    async fn read_token_file<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        let contents = tokio::fs::read_to_string(self.token_dir.join(name))
            .await
            .ok()?;
        serde_json::from_str(&contents).ok()
    }

    async fn write_token_file<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), CopilotError> {
        tokio::fs::create_dir_all(&self.token_dir)
            .await
            .map_err(|e| CopilotError::Io(e.to_string()))?;

        let path = self.token_dir.join(name);
        let contents =
            serde_json::to_string_pretty(value).map_err(|e| CopilotError::Io(e.to_string()))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| CopilotError::Io(e.to_string()))?;

        restrict_permissions(&path).await;
        Ok(())
    }
}

/// Tokens are secrets: keep the cache files owner-readable only.
#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await;
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}
