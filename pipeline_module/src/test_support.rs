//! Shared test doubles for pipeline components.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::connection_store::{
    ConnectionPersistence, ConnectionStatus, ConnectionStoreError, MailboxConnection,
};
use crate::crypto::TokenCipher;
use crate::gmail::{HistoryDelta, MailApi, MailApiError, MailMessage, WatchRegistration};
use crate::token_vault::TokenVault;

pub(crate) const TEST_KEY: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub(crate) fn test_cipher() -> TokenCipher {
    TokenCipher::from_hex(TEST_KEY).unwrap()
}

pub(crate) fn test_vault() -> TokenVault {
    TokenVault::new(
        "client-id".to_string(),
        "client-secret".to_string(),
        test_cipher(),
    )
}

/// Connection whose cached access token is valid, so the vault never makes
/// an HTTP call.
pub(crate) fn connection_with_cached_token() -> MailboxConnection {
    let cipher = test_cipher();
    MailboxConnection {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        email_address: "user@example.com".to_string(),
        access_token_enc: Some(cipher.encrypt("cached-access-token")),
        refresh_token_enc: cipher.encrypt("refresh-token"),
        token_expires_at: Some(Utc::now() + Duration::hours(1)),
        watch_history_id: None,
        watch_expiration: None,
        status: ConnectionStatus::Active,
    }
}

/// Records persistence calls instead of writing rows.
#[derive(Default)]
pub(crate) struct RecordingPersistence {
    pub(crate) token_updates: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
    pub(crate) watch_updates: Mutex<Vec<(Uuid, i64, DateTime<Utc>)>>,
    pub(crate) status_updates: Mutex<Vec<(Uuid, ConnectionStatus)>>,
}

impl ConnectionPersistence for RecordingPersistence {
    fn update_tokens(
        &self,
        id: Uuid,
        _access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError> {
        self.token_updates.lock().unwrap().push((id, expires_at));
        Ok(())
    }

    fn update_watch(
        &self,
        id: Uuid,
        history_id: i64,
        expiration: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError> {
        self.watch_updates
            .lock()
            .unwrap()
            .push((id, history_id, expiration));
        Ok(())
    }

    fn set_status(&self, id: Uuid, status: ConnectionStatus) -> Result<(), ConnectionStoreError> {
        self.status_updates.lock().unwrap().push((id, status));
        Ok(())
    }
}

/// Scripted mail provider.
pub(crate) struct CannedMail {
    pub(crate) watch: Result<WatchRegistration, fn() -> MailApiError>,
    pub(crate) history: Result<Vec<HistoryDelta>, fn() -> MailApiError>,
    pub(crate) messages: Vec<MailMessage>,
    pub(crate) watch_calls: AtomicUsize,
    pub(crate) history_calls: AtomicUsize,
    pub(crate) message_calls: AtomicUsize,
}

impl CannedMail {
    pub(crate) fn healthy() -> Self {
        Self {
            watch: Ok(WatchRegistration {
                history_id: 9999,
                expiration: Utc::now() + Duration::days(7),
            }),
            history: Ok(Vec::new()),
            messages: Vec::new(),
            watch_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            message_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_history(mut self, deltas: Vec<HistoryDelta>) -> Self {
        self.history = Ok(deltas);
        self
    }

    pub(crate) fn with_messages(mut self, messages: Vec<MailMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub(crate) fn with_history_error(mut self, make: fn() -> MailApiError) -> Self {
        self.history = Err(make);
        self
    }
}

impl MailApi for CannedMail {
    fn register_watch(&self, _token: &str) -> Result<WatchRegistration, MailApiError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        match &self.watch {
            Ok(registration) => Ok(registration.clone()),
            Err(make) => Err(make()),
        }
    }

    fn list_history(
        &self,
        _token: &str,
        _start: u64,
    ) -> Result<Vec<HistoryDelta>, MailApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        match &self.history {
            Ok(deltas) => Ok(deltas.clone()),
            Err(make) => Err(make()),
        }
    }

    fn get_message(&self, _token: &str, message_id: &str) -> Result<MailMessage, MailApiError> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        self.messages
            .iter()
            .find(|message| message.id == message_id)
            .cloned()
            .ok_or_else(|| MailApiError::Api {
                status: 404,
                body: format!("message {message_id} not found"),
            })
    }
}

pub(crate) fn mail_message(id: &str, sender: &str, subject: &str, body: &str) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        sender: sender.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
    }
}
