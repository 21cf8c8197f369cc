use uuid::Uuid;

use crate::db::{build_pool, DbError, PgConn, PgPool};

/// Whether the owning user's plan permits pipeline processing.
///
/// Denied access turns watch renewal and history fetch into soft no-ops,
/// never into errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAccess {
    Allowed,
    Denied,
}

impl PlanAccess {
    pub fn allowed(&self) -> bool {
        matches!(self, PlanAccess::Allowed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("db error: {0}")]
    Db(#[from] DbError),
}

#[derive(Clone)]
pub struct SubscriptionStore {
    pool: Option<PgPool>,
}

impl SubscriptionStore {
    pub fn new(db_url: &str) -> Result<Self, SubscriptionStoreError> {
        let pool = build_pool(db_url, "subscription_store", 4)?;
        let store = Self { pool: Some(pool) };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PgConn, SubscriptionStoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::Config("subscription store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), SubscriptionStoreError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                user_id UUID PRIMARY KEY,
                plan TEXT NOT NULL DEFAULT 'free',
                status TEXT NOT NULL DEFAULT 'inactive',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );",
        )?;
        Ok(())
    }

    /// No subscription row means no access.
    pub fn plan_access(&self, user_id: Uuid) -> Result<PlanAccess, SubscriptionStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT plan, status FROM subscriptions WHERE user_id = $1",
            &[&user_id],
        )?;
        let Some(row) = row else {
            return Ok(PlanAccess::Denied);
        };
        let plan: String = row.get(0);
        let status: String = row.get(1);
        let active = matches!(status.as_str(), "active" | "trialing");
        if active && plan != "free" {
            Ok(PlanAccess::Allowed)
        } else {
            Ok(PlanAccess::Denied)
        }
    }

    /// Upsert from the billing webhook (kept minimal; billing itself is
    /// handled elsewhere).
    pub fn upsert(
        &self,
        user_id: Uuid,
        plan: &str,
        status: &str,
    ) -> Result<(), SubscriptionStoreError> {
        let mut conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscriptions (user_id, plan, status, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (user_id) DO UPDATE SET plan = $2, status = $3, updated_at = now()",
            &[&user_id, &plan, &status],
        )?;
        Ok(())
    }
}

impl Drop for SubscriptionStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}
