//! Guardrail hook wrapping an external content evaluation API.
//!
//! Message lists are forwarded to the evaluation endpoint; a `flagged` verdict
//! in the response blocks the request.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::ChatMessage;

/// Verdict returned by a guardrail scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    pub flagged: bool,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    messages: &'a [ChatMessage],
}

/// Client for the external guardrail evaluation API.
#[derive(Clone)]
pub struct GuardrailClient {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl GuardrailClient {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key,
        }
    }

    /// Forward messages to the evaluation API and return its verdict.
    ///
    /// Empty-content messages are dropped before the call; if nothing remains
    /// there is nothing to evaluate and the scan passes without an upstream
    /// round trip.
    pub async fn scan(&self, messages: &[ChatMessage]) -> Result<ScanResult, AppError> {
        let non_empty: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .cloned()
            .collect();

        if non_empty.is_empty() {
            return Ok(ScanResult::default());
        }

        let mut request = self
            .client
            .post(format!("{}/scan", self.api_base.trim_end_matches('/')))
            .json(&ScanRequest {
                messages: &non_empty,
            });

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Guardrail API returned {}: {}",
                status, body
            )));
        }

        let result: ScanResult = response.json().await?;

        if result.flagged {
            tracing::info!(categories = ?result.categories, "Guardrail flagged content");
        }

        Ok(result)
    }
}
