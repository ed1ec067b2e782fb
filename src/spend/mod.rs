//! In-memory spend aggregation with periodic database flushes.
//!
//! Increments are merged per entity in memory and written to the `daily_spend`
//! table in batches, so a burst of requests costs one upsert per entity rather
//! than one write per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{SpendEntityType, SpendIncrement, SpendLogEntry, SpendLogRow};

/// Aggregates spend increments in memory until the next flush.
#[derive(Clone, Default)]
pub struct SpendUpdateQueue {
    pending: Arc<Mutex<HashMap<(SpendEntityType, String), SpendIncrement>>>,
}

impl SpendUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an increment for one entity into the pending map.
    ///
    /// Zero increments are dropped so the flush batch stays minimal.
    pub async fn track(
        &self,
        entity_type: SpendEntityType,
        entity_id: impl Into<String>,
        increment: SpendIncrement,
    ) {
        if increment.is_zero() {
            return;
        }

        let mut pending = self.pending.lock().await;
        pending
            .entry((entity_type, entity_id.into()))
            .or_default()
            .merge(&increment);
    }

    /// Record a completed request: insert a spend log row and enqueue the
    /// matching increments for every entity the request is attributed to.
    pub async fn log_request(
        &self,
        repo: &Repository,
        entry: &SpendLogEntry,
    ) -> Result<SpendLogRow, AppError> {
        let row = repo.insert_spend_log(entry).await?;

        let increment = SpendIncrement {
            spend: entry.spend,
            prompt_tokens: entry.prompt_tokens,
            completion_tokens: entry.completion_tokens,
            api_requests: 1,
        };

        if let Some(key_id) = &entry.api_key_id {
            self.track(SpendEntityType::Key, key_id.clone(), increment)
                .await;
        }
        if let Some(user_id) = &entry.user_id {
            self.track(SpendEntityType::User, user_id.clone(), increment)
                .await;
        }
        if let Some(team_id) = &entry.team_id {
            self.track(SpendEntityType::Team, team_id.clone(), increment)
                .await;
        }
        if let Some(end_user_id) = &entry.end_user_id {
            self.track(SpendEntityType::EndUser, end_user_id.clone(), increment)
                .await;
        }

        Ok(row)
    }

    /// Number of entities with pending increments.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drain the pending map and upsert the batch into the database.
    ///
    /// If the transaction fails, every drained increment is merged back so
    /// nothing is lost to a transient database error. Returns the number of
    /// rows written.
    pub async fn flush(&self, repo: &Repository) -> Result<u64, AppError> {
        let drained: Vec<(SpendEntityType, String, SpendIncrement)> = {
            let mut pending = self.pending.lock().await;
            pending
                .drain()
                .map(|((entity_type, entity_id), inc)| (entity_type, entity_id, inc))
                .collect()
        };

        if drained.is_empty() {
            return Ok(0);
        }

        match repo.flush_spend(&drained).await {
            Ok(written) => {
                tracing::debug!("Flushed spend for {} entities", written);
                Ok(written)
            }
            Err(e) => {
                tracing::warn!("Spend flush failed, restoring {} entries: {}", drained.len(), e);
                let mut pending = self.pending.lock().await;
                for (entity_type, entity_id, inc) in drained {
                    pending
                        .entry((entity_type, entity_id))
                        .or_default()
                        .merge(&inc);
                }
                Err(e)
            }
        }
    }
}

/// Spawn the background task that flushes the queue on a fixed interval.
pub fn spawn_flusher(queue: SpendUpdateQueue, repo: Repository, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick fires immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = queue.flush(&repo).await {
                tracing::warn!("Background spend flush failed: {}", e);
            }
        }
    });
}
