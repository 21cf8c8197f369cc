use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{build_pool, DbError, PgConn, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    ReauthRequired,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::ReauthRequired => "reauth_required",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "reauth_required" => ConnectionStatus::ReauthRequired,
            _ => ConnectionStatus::Active,
        }
    }
}

/// One linked mailbox with its encrypted credentials and watch state.
#[derive(Debug, Clone)]
pub struct MailboxConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email_address: String,
    pub access_token_enc: Option<String>,
    pub refresh_token_enc: String,
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Opaque delta cursor from the last watch registration.
    pub watch_history_id: Option<i64>,
    pub watch_expiration: Option<DateTime<Utc>>,
    pub status: ConnectionStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("db error: {0}")]
    Db(#[from] DbError),
    #[error("connection not found")]
    NotFound,
}

/// The connection mutations pipeline components perform, behind a seam so
/// they can be driven with a test double.
pub trait ConnectionPersistence: Send + Sync {
    fn update_tokens(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError>;

    fn update_watch(
        &self,
        id: Uuid,
        history_id: i64,
        expiration: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError>;

    fn set_status(&self, id: Uuid, status: ConnectionStatus) -> Result<(), ConnectionStoreError>;
}

#[derive(Clone)]
pub struct ConnectionStore {
    pool: Option<PgPool>,
}

impl ConnectionStore {
    pub fn new(db_url: &str) -> Result<Self, ConnectionStoreError> {
        let pool = build_pool(db_url, "connection_store", 10)?;
        let store = Self { pool: Some(pool) };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PgConn, ConnectionStoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::Config("connection store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), ConnectionStoreError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS mailbox_connections (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                email_address TEXT NOT NULL UNIQUE,
                access_token_enc TEXT,
                refresh_token_enc TEXT NOT NULL,
                token_expires_at TIMESTAMPTZ,
                watch_history_id BIGINT,
                watch_expiration TIMESTAMPTZ,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS mailbox_connections_user_idx
                ON mailbox_connections(user_id);",
        )?;
        Ok(())
    }

    /// Create a connection at OAuth linking time.
    pub fn create(
        &self,
        user_id: Uuid,
        email_address: &str,
        refresh_token_enc: &str,
    ) -> Result<MailboxConnection, ConnectionStoreError> {
        let mut conn = self.conn()?;
        let id = Uuid::new_v4();
        let row = conn.query_one(
            "INSERT INTO mailbox_connections (id, user_id, email_address, refresh_token_enc)
             VALUES ($1, $2, $3, $4)
             RETURNING id, user_id, email_address, access_token_enc, refresh_token_enc,
                       token_expires_at, watch_history_id, watch_expiration, status",
            &[&id, &user_id, &email_address, &refresh_token_enc],
        )?;
        Ok(row_to_connection(&row))
    }

    pub fn find_by_email(
        &self,
        email_address: &str,
    ) -> Result<Option<MailboxConnection>, ConnectionStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT id, user_id, email_address, access_token_enc, refresh_token_enc,
                    token_expires_at, watch_history_id, watch_expiration, status
             FROM mailbox_connections WHERE email_address = $1",
            &[&email_address],
        )?;
        Ok(row.as_ref().map(row_to_connection))
    }

    /// Remove a connection on disconnect.
    pub fn delete(&self, id: Uuid) -> Result<(), ConnectionStoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM mailbox_connections WHERE id = $1", &[&id])?;
        if deleted == 0 {
            return Err(ConnectionStoreError::NotFound);
        }
        Ok(())
    }
}

impl ConnectionPersistence for ConnectionStore {
    /// Persist freshly refreshed tokens before they are used.
    fn update_tokens(
        &self,
        id: Uuid,
        access_token_enc: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError> {
        let mut conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE mailbox_connections
             SET access_token_enc = $2, token_expires_at = $3, updated_at = now()
             WHERE id = $1",
            &[&id, &access_token_enc, &expires_at],
        )?;
        if updated == 0 {
            return Err(ConnectionStoreError::NotFound);
        }
        Ok(())
    }

    fn update_watch(
        &self,
        id: Uuid,
        history_id: i64,
        expiration: DateTime<Utc>,
    ) -> Result<(), ConnectionStoreError> {
        let mut conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE mailbox_connections
             SET watch_history_id = $2, watch_expiration = $3, updated_at = now()
             WHERE id = $1",
            &[&id, &history_id, &expiration],
        )?;
        if updated == 0 {
            return Err(ConnectionStoreError::NotFound);
        }
        Ok(())
    }

    fn set_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
    ) -> Result<(), ConnectionStoreError> {
        let mut conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE mailbox_connections SET status = $2, updated_at = now() WHERE id = $1",
            &[&id, &status.as_str()],
        )?;
        if updated == 0 {
            return Err(ConnectionStoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_connection(row: &postgres::Row) -> MailboxConnection {
    let status: String = row.get(8);
    MailboxConnection {
        id: row.get(0),
        user_id: row.get(1),
        email_address: row.get(2),
        access_token_enc: row.get(3),
        refresh_token_enc: row.get(4),
        token_expires_at: row.get(5),
        watch_history_id: row.get(6),
        watch_expiration: row.get(7),
        status: ConnectionStatus::parse(&status),
    }
}

impl Drop for ConnectionStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}
