//! Gateway Ops Backend
//!
//! Operations backend for an LLM gateway: spend tracking, SCIM identity
//! provisioning, GitHub Copilot authentication, guardrail checks, and a
//! bounded session cache.

mod api;
mod auth;
mod config;
mod copilot;
mod db;
mod errors;
mod guardrail;
mod models;
mod scim;
mod sessions;
mod spend;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use copilot::CopilotAuthenticator;
use db::Repository;
use guardrail::GuardrailClient;
use sessions::{MemorySessionStore, RedisSessionStore, SessionStore};
use spend::SpendUpdateQueue;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub spend: SpendUpdateQueue,
    pub sessions: Arc<dyn SessionStore>,
    pub guardrail: Option<GuardrailClient>,
    pub copilot: CopilotAuthenticator,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gateway Ops Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if the master key is not configured
    if config.master_key.is_none() {
        tracing::warn!("No master key configured (OPS_MASTER_KEY). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Session store: Redis when configured, in-memory otherwise
    let session_store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis session store");
            Arc::new(RedisSessionStore::connect(url).await?)
        }
        None => {
            tracing::warn!("No Redis URL configured (OPS_REDIS_URL). Sessions are in-memory only.");
            Arc::new(MemorySessionStore::new())
        }
    };

    // Guardrail client, if an evaluation API is configured
    let guardrail_client = config
        .guardrail_api_base
        .as_ref()
        .map(|base| GuardrailClient::new(base.clone(), config.guardrail_api_key.clone()));

    let authenticator =
        CopilotAuthenticator::new(config.copilot_client_id.clone(), &config.copilot_token_dir);

    // Create application state
    let state = AppState {
        repo: repo.clone(),
        spend: SpendUpdateQueue::new(),
        sessions: session_store,
        guardrail: guardrail_client,
        copilot: authenticator,
        config: Arc::new(config.clone()),
    };

    // Start the background spend flusher
    spend::spawn_flusher(
        state.spend.clone(),
        (*repo).clone(),
        config.spend_flush_secs,
    );

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone the master key for the auth layer
    let master_key = state.config.master_key.clone();
    let scim_master_key = master_key.clone();

    // API routes
    let api_routes = Router::new()
        // Spend tracking
        .route("/spend/track", post(api::track_spend))
        .route("/spend/flush", post(api::flush_spend))
        .route("/spend/daily", get(api::get_daily_spend))
        .route("/spend/logs", get(api::list_spend_logs))
        // Guardrails
        .route("/guardrails/check", post(api::check_guardrail))
        // Sessions
        .route("/sessions/{id}", get(api::get_session))
        .route("/sessions/{id}", post(api::append_session))
        .route("/sessions/{id}", delete(api::delete_session))
        // Provider credentials
        .route("/providers/copilot/login", post(api::copilot_login))
        .route("/providers/copilot/status", get(api::copilot_status))
        .route("/providers/copilot/key", get(api::copilot_key))
        // Apply master-key auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::master_key_auth_layer(master_key.clone(), req, next)
        }));

    // SCIM routes (same auth, SCIM wire format)
    let scim_routes = Router::new()
        .route("/Users", get(api::list_scim_users))
        .route("/Users", post(api::create_scim_user))
        .route("/Users/{id}", get(api::get_scim_user))
        .route("/Users/{id}", put(api::update_scim_user))
        .route("/Users/{id}", delete(api::delete_scim_user))
        .route("/Groups", get(api::list_scim_groups))
        .route("/Groups", post(api::create_scim_group))
        .route("/Groups/{id}", get(api::get_scim_group))
        .route("/Groups/{id}", put(api::update_scim_group))
        .route("/Groups/{id}", delete(api::delete_scim_group))
        .layer(middleware::from_fn(move |req, next| {
            auth::master_key_auth_layer(scim_master_key.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .nest("/scim/v2", scim_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
