use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{build_pool, DbError, PgConn, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    Pending,
    Sent,
    Canceled,
    /// Row persisted but external scheduler registration failed; never
    /// picked up automatically.
    SchedulingFailed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Canceled => "canceled",
            ReminderStatus::SchedulingFailed => "scheduling_failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "sent" => ReminderStatus::Sent,
            "canceled" => ReminderStatus::Canceled,
            "scheduling_failed" => ReminderStatus::SchedulingFailed,
            _ => ReminderStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledReminder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub chat_id: i64,
    pub gmail_message_id: String,
    pub message_content: String,
    pub status: ReminderStatus,
    pub scheduled_at: DateTime<Utc>,
    pub qstash_message_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReminderStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("db error: {0}")]
    Db(#[from] DbError),
    #[error("reminder not found")]
    NotFound,
}

#[derive(Clone)]
pub struct ReminderStore {
    pool: Option<PgPool>,
}

impl ReminderStore {
    pub fn new(db_url: &str) -> Result<Self, ReminderStoreError> {
        let pool = build_pool(db_url, "reminder_store", 10)?;
        let store = Self { pool: Some(pool) };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PgConn, ReminderStoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::Config("reminder store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), ReminderStoreError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS scheduled_reminders (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                chat_id BIGINT NOT NULL,
                gmail_message_id TEXT NOT NULL,
                message_content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                scheduled_at TIMESTAMPTZ NOT NULL,
                qstash_message_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS scheduled_reminders_user_idx
                ON scheduled_reminders(user_id, status);",
        )?;
        Ok(())
    }

    pub fn insert_pending(
        &self,
        user_id: Uuid,
        chat_id: i64,
        gmail_message_id: &str,
        message_content: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<ScheduledReminder, ReminderStoreError> {
        let mut conn = self.conn()?;
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO scheduled_reminders
                (id, user_id, chat_id, gmail_message_id, message_content, status, scheduled_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', $6)",
            &[
                &id,
                &user_id,
                &chat_id,
                &gmail_message_id,
                &message_content,
                &scheduled_at,
            ],
        )?;
        Ok(ScheduledReminder {
            id,
            user_id,
            chat_id,
            gmail_message_id: gmail_message_id.to_string(),
            message_content: message_content.to_string(),
            status: ReminderStatus::Pending,
            scheduled_at,
            qstash_message_id: None,
        })
    }

    /// Store the external scheduler's correlation id after registration.
    pub fn set_correlation(
        &self,
        id: Uuid,
        qstash_message_id: &str,
    ) -> Result<(), ReminderStoreError> {
        let mut conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE scheduled_reminders
             SET qstash_message_id = $2, updated_at = now()
             WHERE id = $1",
            &[&id, &qstash_message_id],
        )?;
        if updated == 0 {
            return Err(ReminderStoreError::NotFound);
        }
        Ok(())
    }

    pub fn mark_sent(&self, id: Uuid) -> Result<(), ReminderStoreError> {
        self.set_status(id, ReminderStatus::Sent)
    }

    pub fn mark_canceled(&self, id: Uuid) -> Result<(), ReminderStoreError> {
        self.set_status(id, ReminderStatus::Canceled)
    }

    pub fn mark_scheduling_failed(&self, id: Uuid) -> Result<(), ReminderStoreError> {
        self.set_status(id, ReminderStatus::SchedulingFailed)
    }

    fn set_status(&self, id: Uuid, status: ReminderStatus) -> Result<(), ReminderStoreError> {
        let mut conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE scheduled_reminders SET status = $2, updated_at = now() WHERE id = $1",
            &[&id, &status.as_str()],
        )?;
        if updated == 0 {
            return Err(ReminderStoreError::NotFound);
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ScheduledReminder>, ReminderStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT id, user_id, chat_id, gmail_message_id, message_content,
                    status, scheduled_at, qstash_message_id
             FROM scheduled_reminders WHERE id = $1",
            &[&id],
        )?;
        Ok(row.map(|row| {
            let status: String = row.get(5);
            ScheduledReminder {
                id: row.get(0),
                user_id: row.get(1),
                chat_id: row.get(2),
                gmail_message_id: row.get(3),
                message_content: row.get(4),
                status: ReminderStatus::parse(&status),
                scheduled_at: row.get(6),
                qstash_message_id: row.get(7),
            }
        }))
    }
}

impl Drop for ReminderStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}
