//! Delayed-callback registration with the external scheduler (QStash).
//!
//! The scheduler POSTs back into `/reminders/dispatch` at the requested
//! time; the returned message id is stored on the reminder row as the
//! correlation id.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QstashError {
    #[error("http error: {0}")]
    Http(String),
    #[error("scheduler returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("scheduler response had no message id")]
    MissingMessageId,
}

#[derive(Debug, Clone)]
pub struct QstashClient {
    base_url: String,
    token: String,
    callback_url: String,
}

impl QstashClient {
    pub fn new(base_url: String, token: String, callback_url: String) -> Self {
        Self {
            base_url,
            token,
            callback_url,
        }
    }

    /// Register a delayed callback for one reminder; returns the scheduler's
    /// correlation id.
    pub fn schedule_callback(
        &self,
        reminder_id: Uuid,
        deliver_at: DateTime<Utc>,
    ) -> Result<String, QstashError> {
        let url = format!(
            "{}/v2/publish/{}",
            self.base_url.trim_end_matches('/'),
            self.callback_url
        );
        let body = serde_json::json!({ "reminderId": reminder_id });

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Upstash-Not-Before", deliver_at.timestamp().to_string())
            .json(&body)
            .send()
            .map_err(|err| QstashError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(QstashError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: PublishResponse = response
            .json()
            .map_err(|err| QstashError::Http(err.to_string()))?;
        let message_id = payload
            .message_id
            .filter(|id| !id.is_empty())
            .ok_or(QstashError::MissingMessageId)?;

        debug!(
            "scheduled reminder {} for {} (qstash message {})",
            reminder_id, deliver_at, message_id
        );
        Ok(message_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: Option<String>,
}
