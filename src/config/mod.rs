//! Configuration module for the gateway ops backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Public client id of the GitHub Copilot app, used when none is configured.
pub const DEFAULT_COPILOT_CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared master key for API authentication (required in production)
    pub master_key: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Redis connection URL for the session cache (in-memory fallback when unset)
    pub redis_url: Option<String>,
    /// Seconds between background spend flushes
    pub spend_flush_secs: u64,
    /// Base URL of the external guardrail evaluation API
    pub guardrail_api_base: Option<String>,
    /// API key for the guardrail evaluation API
    pub guardrail_api_key: Option<String>,
    /// Directory where Copilot tokens are cached
    pub copilot_token_dir: PathBuf,
    /// OAuth client id for the Copilot device flow
    pub copilot_client_id: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let master_key = env::var("OPS_MASTER_KEY").ok();

        let db_path = env::var("OPS_DB_PATH")
            .unwrap_or_else(|_| "./data/gateway.sqlite".to_string())
            .into();

        let bind_addr = env::var("OPS_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:4100".to_string())
            .parse()
            .expect("Invalid OPS_BIND_ADDR format");

        let log_level = env::var("OPS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let redis_url = env::var("OPS_REDIS_URL").ok();

        let spend_flush_secs = env::var("OPS_SPEND_FLUSH_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let guardrail_api_base = env::var("OPS_GUARDRAIL_API_BASE").ok();
        let guardrail_api_key = env::var("OPS_GUARDRAIL_API_KEY").ok();

        let copilot_token_dir = env::var("OPS_COPILOT_TOKEN_DIR")
            .unwrap_or_else(|_| "./data/copilot".to_string())
            .into();

        let copilot_client_id =
            env::var("OPS_COPILOT_CLIENT_ID").unwrap_or_else(|_| DEFAULT_COPILOT_CLIENT_ID.to_string());

        Self {
            master_key,
            db_path,
            bind_addr,
            log_level,
            redis_url,
            spend_flush_secs,
            guardrail_api_base,
            guardrail_api_key,
            copilot_token_dir,
            copilot_client_id,
        }
    }
}
