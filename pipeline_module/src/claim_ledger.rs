//! Per-message idempotency gate.
//!
//! A claim is an exclusive, storage-enforced right to process one message
//! exactly once. The insert-if-absent over `(user_id, message_id)` is the
//! pipeline's sole concurrency-safety mechanism: a conflicting claim means
//! the caller must perform zero further side effects for that message.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{build_pool, DbError, PgConn, PgPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Processing,
    Completed,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Processing => "processing",
            ClaimStatus::Completed => "completed",
            ClaimStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "completed" => ClaimStatus::Completed,
            "failed" => ClaimStatus::Failed,
            _ => ClaimStatus::Processing,
        }
    }
}

/// Analysis results persisted when a claim completes.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub message_score: i32,
    pub flagged_keywords: Vec<String>,
    pub reply_message: String,
    pub calendar: Option<serde_json::Value>,
    pub usage_tokens: i32,
}

#[derive(Debug, Clone)]
pub struct ClaimRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message_id: String,
    pub status: ClaimStatus,
    pub message_score: Option<i32>,
    pub flagged_keywords: Vec<String>,
    pub reply_message: Option<String>,
    pub calendar: Option<serde_json::Value>,
    pub usage_tokens: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimLedgerError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("db error: {0}")]
    Db(#[from] DbError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("claim not found")]
    NotFound,
}

pub trait ClaimLedger: Send + Sync {
    /// Insert-if-absent. `None` means another invocation already holds (or
    /// held) the claim and the message must be skipped entirely.
    fn claim(&self, user_id: Uuid, message_id: &str) -> Result<Option<Uuid>, ClaimLedgerError>;

    fn complete(&self, claim_id: Uuid, outcome: &ClaimOutcome) -> Result<(), ClaimLedgerError>;

    /// Flip to `failed` without erasing analysis columns already written.
    fn fail(&self, claim_id: Uuid, error: &str) -> Result<(), ClaimLedgerError>;

    fn get(
        &self,
        user_id: Uuid,
        message_id: &str,
    ) -> Result<Option<ClaimRecord>, ClaimLedgerError>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

#[derive(Clone)]
pub struct PostgresClaimLedger {
    pool: Option<PgPool>,
}

impl PostgresClaimLedger {
    pub fn new(db_url: &str) -> Result<Self, ClaimLedgerError> {
        let pool = build_pool(db_url, "claim_ledger", 10)?;
        let ledger = Self { pool: Some(pool) };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    fn conn(&self) -> Result<PgConn, ClaimLedgerError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::Config("claim ledger pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), ClaimLedgerError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS email_ai_responses (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                message_id TEXT NOT NULL,
                message_status TEXT NOT NULL,
                message_score INTEGER,
                flagged_keywords TEXT NOT NULL DEFAULT '[]',
                reply_message TEXT,
                calendar TEXT,
                usage_tokens INTEGER,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (user_id, message_id)
            );",
        )?;
        Ok(())
    }
}

impl ClaimLedger for PostgresClaimLedger {
    fn claim(&self, user_id: Uuid, message_id: &str) -> Result<Option<Uuid>, ClaimLedgerError> {
        let mut conn = self.conn()?;
        let id = Uuid::new_v4();
        let inserted = conn.execute(
            "INSERT INTO email_ai_responses (id, user_id, message_id, message_status)
             VALUES ($1, $2, $3, 'processing')
             ON CONFLICT (user_id, message_id) DO NOTHING",
            &[&id, &user_id, &message_id],
        )?;
        Ok((inserted > 0).then_some(id))
    }

    fn complete(&self, claim_id: Uuid, outcome: &ClaimOutcome) -> Result<(), ClaimLedgerError> {
        let mut conn = self.conn()?;
        let flagged = serde_json::to_string(&outcome.flagged_keywords)?;
        let calendar = outcome
            .calendar
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let updated = conn.execute(
            "UPDATE email_ai_responses
             SET message_status = 'completed',
                 message_score = $2,
                 flagged_keywords = $3,
                 reply_message = $4,
                 calendar = $5,
                 usage_tokens = $6,
                 updated_at = now()
             WHERE id = $1",
            &[
                &claim_id,
                &outcome.message_score,
                &flagged,
                &outcome.reply_message,
                &calendar,
                &outcome.usage_tokens,
            ],
        )?;
        if updated == 0 {
            return Err(ClaimLedgerError::NotFound);
        }
        Ok(())
    }

    fn fail(&self, claim_id: Uuid, error: &str) -> Result<(), ClaimLedgerError> {
        let mut conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE email_ai_responses
             SET message_status = 'failed', last_error = $2, updated_at = now()
             WHERE id = $1",
            &[&claim_id, &error],
        )?;
        if updated == 0 {
            return Err(ClaimLedgerError::NotFound);
        }
        Ok(())
    }

    fn get(
        &self,
        user_id: Uuid,
        message_id: &str,
    ) -> Result<Option<ClaimRecord>, ClaimLedgerError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT id, user_id, message_id, message_status, message_score,
                    flagged_keywords, reply_message, calendar, usage_tokens, updated_at
             FROM email_ai_responses
             WHERE user_id = $1 AND message_id = $2",
            &[&user_id, &message_id],
        )?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.get(3);
        let flagged: String = row.get(5);
        let calendar: Option<String> = row.get(7);
        Ok(Some(ClaimRecord {
            id: row.get(0),
            user_id: row.get(1),
            message_id: row.get(2),
            status: ClaimStatus::parse(&status),
            message_score: row.get(4),
            flagged_keywords: serde_json::from_str(&flagged)?,
            reply_message: row.get(6),
            calendar: calendar.map(|raw| serde_json::from_str(&raw)).transpose()?,
            usage_tokens: row.get(8),
            updated_at: row.get(9),
        }))
    }
}

impl Drop for PostgresClaimLedger {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

// ============================================================================
// In-memory implementation (tests, local development)
// ============================================================================

#[derive(Default)]
pub struct MemoryClaimLedger {
    inner: Mutex<MemoryLedgerInner>,
}

#[derive(Default)]
struct MemoryLedgerInner {
    by_key: HashMap<(Uuid, String), ClaimRecord>,
    by_id: HashMap<Uuid, (Uuid, String)>,
}

impl MemoryClaimLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClaimLedger for MemoryClaimLedger {
    fn claim(&self, user_id: Uuid, message_id: &str) -> Result<Option<Uuid>, ClaimLedgerError> {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let key = (user_id, message_id.to_string());
        if inner.by_key.contains_key(&key) {
            return Ok(None);
        }
        let id = Uuid::new_v4();
        inner.by_key.insert(
            key.clone(),
            ClaimRecord {
                id,
                user_id,
                message_id: message_id.to_string(),
                status: ClaimStatus::Processing,
                message_score: None,
                flagged_keywords: Vec::new(),
                reply_message: None,
                calendar: None,
                usage_tokens: None,
                updated_at: Utc::now(),
            },
        );
        inner.by_id.insert(id, key);
        Ok(Some(id))
    }

    fn complete(&self, claim_id: Uuid, outcome: &ClaimOutcome) -> Result<(), ClaimLedgerError> {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let key = inner
            .by_id
            .get(&claim_id)
            .cloned()
            .ok_or(ClaimLedgerError::NotFound)?;
        let record = inner
            .by_key
            .get_mut(&key)
            .ok_or(ClaimLedgerError::NotFound)?;
        record.status = ClaimStatus::Completed;
        record.message_score = Some(outcome.message_score);
        record.flagged_keywords = outcome.flagged_keywords.clone();
        record.reply_message = Some(outcome.reply_message.clone());
        record.calendar = outcome.calendar.clone();
        record.usage_tokens = Some(outcome.usage_tokens);
        record.updated_at = Utc::now();
        Ok(())
    }

    fn fail(&self, claim_id: Uuid, _error: &str) -> Result<(), ClaimLedgerError> {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let key = inner
            .by_id
            .get(&claim_id)
            .cloned()
            .ok_or(ClaimLedgerError::NotFound)?;
        let record = inner
            .by_key
            .get_mut(&key)
            .ok_or(ClaimLedgerError::NotFound)?;
        record.status = ClaimStatus::Failed;
        record.updated_at = Utc::now();
        Ok(())
    }

    fn get(
        &self,
        user_id: Uuid,
        message_id: &str,
    ) -> Result<Option<ClaimRecord>, ClaimLedgerError> {
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        Ok(inner
            .by_key
            .get(&(user_id, message_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn resolve_test_db_url() -> Option<String> {
        dotenvy::dotenv().ok();
        std::env::var("PIPELINE_DB_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    #[test]
    fn memory_claim_is_exclusive() {
        let ledger = MemoryClaimLedger::new();
        let user = Uuid::new_v4();
        let first = ledger.claim(user, "msg_abc").unwrap();
        let second = ledger.claim(user, "msg_abc").unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn concurrent_claims_yield_exactly_one_winner() {
        let ledger = Arc::new(MemoryClaimLedger::new());
        let user = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.claim(user, "msg_abc").unwrap())
            })
            .collect();

        let results: Vec<Option<Uuid>> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        let winners = results.iter().filter(|result| result.is_some()).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn failed_claim_is_terminal() {
        let ledger = MemoryClaimLedger::new();
        let user = Uuid::new_v4();
        let claim_id = ledger.claim(user, "msg_abc").unwrap().unwrap();
        ledger.fail(claim_id, "classifier unreachable").unwrap();

        let record = ledger.get(user, "msg_abc").unwrap().unwrap();
        assert_eq!(record.status, ClaimStatus::Failed);
        // The unique key still blocks any re-claim.
        assert!(ledger.claim(user, "msg_abc").unwrap().is_none());
    }

    #[test]
    fn fail_after_complete_keeps_analysis() {
        let ledger = MemoryClaimLedger::new();
        let user = Uuid::new_v4();
        let claim_id = ledger.claim(user, "msg_abc").unwrap().unwrap();
        ledger
            .complete(
                claim_id,
                &ClaimOutcome {
                    message_score: 65,
                    flagged_keywords: vec!["invoice".to_string()],
                    reply_message: "Invoice due Friday".to_string(),
                    calendar: None,
                    usage_tokens: 180,
                },
            )
            .unwrap();
        ledger.fail(claim_id, "telegram unreachable").unwrap();

        let record = ledger.get(user, "msg_abc").unwrap().unwrap();
        assert_eq!(record.status, ClaimStatus::Failed);
        assert_eq!(record.message_score, Some(65));
        assert_eq!(record.reply_message.as_deref(), Some("Invoice due Friday"));
    }

    #[test]
    fn different_messages_claim_independently() {
        let ledger = MemoryClaimLedger::new();
        let user = Uuid::new_v4();
        assert!(ledger.claim(user, "msg_a").unwrap().is_some());
        assert!(ledger.claim(user, "msg_b").unwrap().is_some());
        assert!(ledger.claim(Uuid::new_v4(), "msg_a").unwrap().is_some());
    }

    #[test]
    fn postgres_claim_conflict() {
        let Some(db_url) = resolve_test_db_url() else {
            eprintln!("skipping: PIPELINE_DB_URL not set");
            return;
        };
        let ledger = PostgresClaimLedger::new(&db_url).expect("ledger");
        let user = Uuid::new_v4();
        let message_id = format!("msg_{}", Uuid::new_v4().simple());

        let first = ledger.claim(user, &message_id).expect("claim");
        let second = ledger.claim(user, &message_id).expect("claim");
        assert!(first.is_some());
        assert!(second.is_none());
    }
}
