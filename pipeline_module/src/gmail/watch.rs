//! Watch registrar: keeps the push subscription alive per mailbox.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::connection_store::{ConnectionPersistence, ConnectionStoreError, MailboxConnection};
use crate::subscription_store::PlanAccess;
use crate::token_vault::{TokenError, TokenVault};

use super::{MailApi, MailApiError};

/// Renewal happens once the watch is within this margin of expiring.
pub const RENEWAL_MARGIN_HOURS: i64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("provider error: {0}")]
    Provider(#[from] MailApiError),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("store error: {0}")]
    Store(#[from] ConnectionStoreError),
}

/// Ensure a live watch exists, renewing inside the expiry margin.
///
/// Returns the history cursor to resolve deltas from; `None` when the
/// mailbox has never been watched and renewal was skipped. Nothing is
/// persisted unless the provider confirmed a new registration.
pub fn ensure_valid_watch(
    mail: &dyn MailApi,
    vault: &TokenVault,
    store: &dyn ConnectionPersistence,
    connection: &mut MailboxConnection,
    access: PlanAccess,
    now: DateTime<Utc>,
) -> Result<Option<u64>, WatchError> {
    if !access.allowed() {
        debug!(
            "plan access denied for {}, keeping existing watch state",
            connection.email_address
        );
        return Ok(connection.watch_history_id.map(|id| id as u64));
    }

    if let (Some(cursor), Some(expiration)) =
        (connection.watch_history_id, connection.watch_expiration)
    {
        if now < expiration - Duration::hours(RENEWAL_MARGIN_HOURS) {
            return Ok(Some(cursor as u64));
        }
    }

    let access_token = vault.access_token(store, connection)?;
    let registration = mail.register_watch(&access_token)?;

    store.update_watch(
        connection.id,
        registration.history_id as i64,
        registration.expiration,
    )?;
    connection.watch_history_id = Some(registration.history_id as i64);
    connection.watch_expiration = Some(registration.expiration);

    info!(
        "renewed watch for {}, cursor={} expires={}",
        connection.email_address, registration.history_id, registration.expiration
    );
    Ok(Some(registration.history_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection_with_cached_token, CannedMail, RecordingPersistence, test_vault};
    use std::sync::atomic::Ordering;

    #[test]
    fn fresh_watch_is_a_noop() {
        let mail = CannedMail::healthy();
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let now = Utc::now();

        let mut connection = connection_with_cached_token();
        connection.watch_history_id = Some(1234);
        connection.watch_expiration = Some(now + Duration::days(5));

        let cursor = ensure_valid_watch(
            &mail,
            &vault,
            &store,
            &mut connection,
            PlanAccess::Allowed,
            now,
        )
        .unwrap();

        assert_eq!(cursor, Some(1234));
        assert_eq!(mail.watch_calls.load(Ordering::SeqCst), 0);
        assert!(store.watch_updates.lock().unwrap().is_empty());
    }

    #[test]
    fn near_expiry_watch_is_renewed_and_persisted() {
        let mail = CannedMail::healthy();
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let now = Utc::now();

        let mut connection = connection_with_cached_token();
        connection.watch_history_id = Some(1234);
        connection.watch_expiration = Some(now + Duration::hours(2));

        let cursor = ensure_valid_watch(
            &mail,
            &vault,
            &store,
            &mut connection,
            PlanAccess::Allowed,
            now,
        )
        .unwrap();

        assert_eq!(cursor, Some(9999));
        assert_eq!(mail.watch_calls.load(Ordering::SeqCst), 1);
        let updates = store.watch_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1, 9999);
        assert_eq!(connection.watch_history_id, Some(9999));
    }

    #[test]
    fn missing_watch_is_registered() {
        let mail = CannedMail::healthy();
        let store = RecordingPersistence::default();
        let vault = test_vault();

        let mut connection = connection_with_cached_token();
        let cursor = ensure_valid_watch(
            &mail,
            &vault,
            &store,
            &mut connection,
            PlanAccess::Allowed,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(cursor, Some(9999));
        assert_eq!(mail.watch_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn denied_access_returns_existing_cursor_untouched() {
        let mail = CannedMail::healthy();
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let now = Utc::now();

        let mut connection = connection_with_cached_token();
        connection.watch_history_id = Some(1234);
        // Already expired, but denied access must still skip renewal.
        connection.watch_expiration = Some(now - Duration::hours(1));

        let cursor = ensure_valid_watch(
            &mail,
            &vault,
            &store,
            &mut connection,
            PlanAccess::Denied,
            now,
        )
        .unwrap();

        assert_eq!(cursor, Some(1234));
        assert_eq!(mail.watch_calls.load(Ordering::SeqCst), 0);
        assert!(store.watch_updates.lock().unwrap().is_empty());
    }

    #[test]
    fn provider_failure_persists_nothing() {
        let mut mail = CannedMail::healthy();
        mail.watch = Err(|| MailApiError::Api {
            status: 500,
            body: "backend error".to_string(),
        });
        let store = RecordingPersistence::default();
        let vault = test_vault();

        let mut connection = connection_with_cached_token();
        let err = ensure_valid_watch(
            &mail,
            &vault,
            &store,
            &mut connection,
            PlanAccess::Allowed,
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(err, WatchError::Provider(_)));
        assert!(store.watch_updates.lock().unwrap().is_empty());
        assert!(connection.watch_history_id.is_none());
    }
}
