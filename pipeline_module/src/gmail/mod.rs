//! Gmail provider surface: push decode, watch registration, history deltas,
//! message fetch. Everything the pipeline needs is behind [`MailApi`] so
//! tests can drive it with a double.

mod client;
pub mod history;
pub mod messages;
pub mod push;
pub mod watch;

pub use client::GmailClient;

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum MailApiError {
    /// Credentials rejected; the connection needs re-linking.
    #[error("provider rejected credentials: {0}")]
    Auth(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("provider returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

impl MailApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, MailApiError::Auth(_))
    }
}

/// Result of (re-)registering the push subscription.
#[derive(Debug, Clone)]
pub struct WatchRegistration {
    pub history_id: u64,
    pub expiration: DateTime<Utc>,
}

/// One history entry; only message-added events are surfaced.
#[derive(Debug, Clone)]
pub struct HistoryDelta {
    pub id: u64,
    pub added_message_ids: Vec<String>,
}

/// A fetched message reduced to what classification needs.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
}

pub trait MailApi: Send + Sync {
    fn register_watch(&self, access_token: &str) -> Result<WatchRegistration, MailApiError>;

    /// All inbox message-added history entries since `start_history_id`.
    fn list_history(
        &self,
        access_token: &str,
        start_history_id: u64,
    ) -> Result<Vec<HistoryDelta>, MailApiError>;

    fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<MailMessage, MailApiError>;
}
