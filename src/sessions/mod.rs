//! Bounded chat-session cache.
//!
//! Redis-backed in production, in-memory when no Redis URL is configured.
//! Sessions hold a JSON list of chat messages, trimmed to a maximum length on
//! every write, with the TTL refreshed on write and never on read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::ChatMessage;

/// Default session TTL.
pub const DEFAULT_TTL_SECS: u64 = 3600;
/// Default cap on stored messages per session.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// Trim a message list to its most recent `max` entries.
fn trim_to_tail(mut messages: Vec<ChatMessage>, max: usize) -> Vec<ChatMessage> {
    if messages.len() > max {
        messages.drain(..messages.len() - max);
    }
    messages
}

/// Storage backend for chat sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a session's messages (empty when absent or expired).
    async fn get(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError>;

    /// Append messages, trim to `max_messages` (keeping the newest), and
    /// refresh the TTL. Returns the stored length.
    async fn append(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        ttl: Duration,
        max_messages: usize,
    ) -> Result<usize, AppError>;

    /// Drop a session.
    async fn delete(&self, session_id: &str) -> Result<(), AppError>;
}

// ==================== REDIS BACKEND ====================

/// Redis-backed session store using the async connection manager.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(session_key(session_id)).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    async fn append(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        ttl: Duration,
        max_messages: usize,
    ) -> Result<usize, AppError> {
        let mut existing = self.get(session_id).await?;
        existing.extend_from_slice(messages);
        let stored = trim_to_tail(existing, max_messages);

        let json = serde_json::to_string(&stored)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(session_key(session_id), json, ttl.as_secs())
            .await?;

        Ok(stored.len())
    }

    async fn delete(&self, session_id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(session_key(session_id)).await?;
        Ok(())
    }
}

// ==================== MEMORY BACKEND ====================

struct MemoryEntry {
    messages: Vec<ChatMessage>,
    expires_at: Instant,
}

/// In-memory session store, used when Redis is not configured and in tests.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<ChatMessage>, AppError> {
        let key = session_key(session_id);

        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(entry.messages.clone())
                }
                Some(_) => {}
                None => return Ok(Vec::new()),
            }
        }

        // Expired: drop lazily. Reads never refresh the TTL.
        self.entries.write().await.remove(&key);
        Ok(Vec::new())
    }

    async fn append(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        ttl: Duration,
        max_messages: usize,
    ) -> Result<usize, AppError> {
        let mut existing = self.get(session_id).await?;
        existing.extend_from_slice(messages);
        let stored = trim_to_tail(existing, max_messages);
        let len = stored.len();

        self.entries.write().await.insert(
            session_key(session_id),
            MemoryEntry {
                messages: stored,
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(len)
    }

    async fn delete(&self, session_id: &str) -> Result<(), AppError> {
        self.entries.write().await.remove(&session_key(session_id));
        Ok(())
    }
}
