//! History resolver: turns a push notification into the inbox message-added
//! deltas accumulated since the stored cursor.

use tracing::{debug, warn};

use crate::connection_store::{
    ConnectionPersistence, ConnectionStatus, ConnectionStoreError, MailboxConnection,
};
use crate::subscription_store::PlanAccess;
use crate::token_vault::TokenVault;

use super::{HistoryDelta, MailApi};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Credentials rejected; the connection was marked `reauth_required`
    /// and processing must halt until the user re-links.
    #[error("mailbox requires re-authentication")]
    Reauth,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("store error: {0}")]
    Store(#[from] ConnectionStoreError),
}

pub fn fetch_history(
    mail: &dyn MailApi,
    vault: &TokenVault,
    store: &dyn ConnectionPersistence,
    connection: &mut MailboxConnection,
    access: PlanAccess,
) -> Result<Vec<HistoryDelta>, HistoryError> {
    if !access.allowed() {
        debug!(
            "plan access denied for {}, skipping history fetch",
            connection.email_address
        );
        return Ok(Vec::new());
    }

    let Some(cursor) = connection.watch_history_id else {
        debug!(
            "no history cursor for {}, nothing to resolve",
            connection.email_address
        );
        return Ok(Vec::new());
    };

    let access_token = match vault.access_token(store, connection) {
        Ok(token) => token,
        Err(err) if err.is_auth() => {
            mark_reauth(store, connection)?;
            return Err(HistoryError::Reauth);
        }
        Err(err) => return Err(HistoryError::Provider(err.to_string())),
    };

    match mail.list_history(&access_token, cursor as u64) {
        Ok(deltas) => Ok(deltas),
        Err(err) if err.is_auth() => {
            mark_reauth(store, connection)?;
            Err(HistoryError::Reauth)
        }
        Err(err) => Err(HistoryError::Provider(err.to_string())),
    }
}

fn mark_reauth(
    store: &dyn ConnectionPersistence,
    connection: &mut MailboxConnection,
) -> Result<(), ConnectionStoreError> {
    warn!(
        "credentials rejected for {}, marking reauth_required",
        connection.email_address
    );
    store.set_status(connection.id, ConnectionStatus::ReauthRequired)?;
    connection.status = ConnectionStatus::ReauthRequired;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::MailApiError;
    use crate::test_support::{
        connection_with_cached_token, test_vault, CannedMail, RecordingPersistence,
    };
    use std::sync::atomic::Ordering;

    fn watched_connection() -> MailboxConnection {
        let mut connection = connection_with_cached_token();
        connection.watch_history_id = Some(1000);
        connection
    }

    #[test]
    fn returns_deltas_since_cursor() {
        let mail = CannedMail::healthy().with_history(vec![HistoryDelta {
            id: 1001,
            added_message_ids: vec!["msg_a".to_string()],
        }]);
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let mut connection = watched_connection();

        let deltas =
            fetch_history(&mail, &vault, &store, &mut connection, PlanAccess::Allowed).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].added_message_ids, vec!["msg_a"]);
    }

    #[test]
    fn denied_access_is_a_soft_noop() {
        let mail = CannedMail::healthy();
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let mut connection = watched_connection();

        let deltas =
            fetch_history(&mail, &vault, &store, &mut connection, PlanAccess::Denied).unwrap();
        assert!(deltas.is_empty());
        assert_eq!(mail.history_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_cursor_yields_empty() {
        let mail = CannedMail::healthy();
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let mut connection = connection_with_cached_token();

        let deltas =
            fetch_history(&mail, &vault, &store, &mut connection, PlanAccess::Allowed).unwrap();
        assert!(deltas.is_empty());
        assert_eq!(mail.history_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn auth_failure_marks_reauth_and_is_distinguishable() {
        let mail = CannedMail::healthy()
            .with_history_error(|| MailApiError::Auth("invalid credentials".to_string()));
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let mut connection = watched_connection();

        let err = fetch_history(&mail, &vault, &store, &mut connection, PlanAccess::Allowed)
            .unwrap_err();

        assert!(matches!(err, HistoryError::Reauth));
        assert_eq!(connection.status, ConnectionStatus::ReauthRequired);
        let statuses = store.status_updates.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].1, ConnectionStatus::ReauthRequired);
    }

    #[test]
    fn other_failures_do_not_mutate_connection_state() {
        let mail = CannedMail::healthy().with_history_error(|| MailApiError::Api {
            status: 503,
            body: "unavailable".to_string(),
        });
        let store = RecordingPersistence::default();
        let vault = test_vault();
        let mut connection = watched_connection();

        let err = fetch_history(&mail, &vault, &store, &mut connection, PlanAccess::Allowed)
            .unwrap_err();

        assert!(matches!(err, HistoryError::Provider(_)));
        assert_eq!(connection.status, ConnectionStatus::Active);
        assert!(store.status_updates.lock().unwrap().is_empty());
    }
}
