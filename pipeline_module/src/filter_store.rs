use std::collections::HashMap;

use uuid::Uuid;

use crate::db::{build_pool, DbError, PgConn, PgPool};

/// Per-top-level-category enable switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryToggles {
    pub financial: bool,
    pub marketing: bool,
    pub security: bool,
    pub deadline: bool,
    pub work: bool,
    pub personal: bool,
    pub legal: bool,
    pub custom: bool,
}

impl Default for CategoryToggles {
    fn default() -> Self {
        Self {
            financial: true,
            marketing: true,
            security: true,
            deadline: true,
            work: true,
            personal: true,
            legal: true,
            custom: true,
        }
    }
}

/// User notification preferences; read-only during pipeline execution.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub notification_mode: String,
    pub watch_tags: Vec<String>,
    pub ignore_tags: Vec<String>,
    pub first_time_sender: bool,
    pub thread_reply: bool,
    pub deadline_alerts: bool,
    pub subscription_payment_alerts: bool,
    pub toggles: CategoryToggles,
    /// Per-subcategory weights 0-100; an absent key counts as 0.
    pub weights: HashMap<String, u8>,
    pub min_score_for_telegram: u8,
    /// Delivery destination; None until the user links their chat.
    pub telegram_chat_id: Option<i64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            notification_mode: "all".to_string(),
            watch_tags: Vec::new(),
            ignore_tags: Vec::new(),
            first_time_sender: true,
            thread_reply: true,
            deadline_alerts: true,
            subscription_payment_alerts: true,
            toggles: CategoryToggles::default(),
            weights: HashMap::new(),
            min_score_for_telegram: 70,
            telegram_chat_id: None,
        }
    }
}

/// A user-defined monitoring rule; weighs into scoring like a built-in
/// subcategory when the custom toggle is on.
#[derive(Debug, Clone)]
pub struct CustomCategory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category: String,
    pub user_facing_category: String,
    pub description: String,
    pub weight: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("db error: {0}")]
    Db(#[from] DbError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("custom category not found")]
    NotFound,
}

#[derive(Clone)]
pub struct FilterStore {
    pool: Option<PgPool>,
}

impl FilterStore {
    pub fn new(db_url: &str) -> Result<Self, FilterStoreError> {
        let pool = build_pool(db_url, "filter_store", 10)?;
        let store = Self { pool: Some(pool) };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PgConn, FilterStoreError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::Config("filter store pool dropped".to_string()))?;
        Ok(pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), FilterStoreError> {
        let mut conn = self.conn()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS filter_configs (
                user_id UUID PRIMARY KEY,
                notification_mode TEXT NOT NULL DEFAULT 'all',
                watch_tags TEXT NOT NULL DEFAULT '[]',
                ignore_tags TEXT NOT NULL DEFAULT '[]',
                first_time_sender BOOLEAN NOT NULL DEFAULT true,
                thread_reply BOOLEAN NOT NULL DEFAULT true,
                deadline_alerts BOOLEAN NOT NULL DEFAULT true,
                subscription_payment_alerts BOOLEAN NOT NULL DEFAULT true,
                toggle_financial BOOLEAN NOT NULL DEFAULT true,
                toggle_marketing BOOLEAN NOT NULL DEFAULT true,
                toggle_security BOOLEAN NOT NULL DEFAULT true,
                toggle_deadline BOOLEAN NOT NULL DEFAULT true,
                toggle_work BOOLEAN NOT NULL DEFAULT true,
                toggle_personal BOOLEAN NOT NULL DEFAULT true,
                toggle_legal BOOLEAN NOT NULL DEFAULT true,
                toggle_custom BOOLEAN NOT NULL DEFAULT true,
                weights TEXT NOT NULL DEFAULT '{}',
                min_score_for_telegram INTEGER NOT NULL DEFAULT 70,
                telegram_chat_id BIGINT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE TABLE IF NOT EXISTS custom_categories (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                category TEXT NOT NULL,
                user_facing_category TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                weight INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (user_id, category)
            );",
        )?;
        Ok(())
    }

    /// Load the user's filters, falling back to defaults when no row exists.
    pub fn load_for_user(&self, user_id: Uuid) -> Result<FilterConfig, FilterStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT notification_mode, watch_tags, ignore_tags,
                    first_time_sender, thread_reply, deadline_alerts,
                    subscription_payment_alerts,
                    toggle_financial, toggle_marketing, toggle_security, toggle_deadline,
                    toggle_work, toggle_personal, toggle_legal, toggle_custom,
                    weights, min_score_for_telegram, telegram_chat_id
             FROM filter_configs WHERE user_id = $1",
            &[&user_id],
        )?;

        let Some(row) = row else {
            return Ok(FilterConfig::default());
        };

        let watch_tags: String = row.get(1);
        let ignore_tags: String = row.get(2);
        let weights: String = row.get(15);
        let min_score: i32 = row.get(16);

        Ok(FilterConfig {
            notification_mode: row.get(0),
            watch_tags: serde_json::from_str(&watch_tags)?,
            ignore_tags: serde_json::from_str(&ignore_tags)?,
            first_time_sender: row.get(3),
            thread_reply: row.get(4),
            deadline_alerts: row.get(5),
            subscription_payment_alerts: row.get(6),
            toggles: CategoryToggles {
                financial: row.get(7),
                marketing: row.get(8),
                security: row.get(9),
                deadline: row.get(10),
                work: row.get(11),
                personal: row.get(12),
                legal: row.get(13),
                custom: row.get(14),
            },
            weights: serde_json::from_str(&weights)?,
            min_score_for_telegram: min_score.clamp(0, 100) as u8,
            telegram_chat_id: row.get(17),
        })
    }

    /// Upsert the full filter row (user settings edits).
    pub fn save_for_user(
        &self,
        user_id: Uuid,
        filters: &FilterConfig,
    ) -> Result<(), FilterStoreError> {
        let mut conn = self.conn()?;
        let watch_tags = serde_json::to_string(&filters.watch_tags)?;
        let ignore_tags = serde_json::to_string(&filters.ignore_tags)?;
        let weights = serde_json::to_string(&filters.weights)?;
        let min_score = i32::from(filters.min_score_for_telegram);
        conn.execute(
            "INSERT INTO filter_configs
                (user_id, notification_mode, watch_tags, ignore_tags,
                 first_time_sender, thread_reply, deadline_alerts, subscription_payment_alerts,
                 toggle_financial, toggle_marketing, toggle_security, toggle_deadline,
                 toggle_work, toggle_personal, toggle_legal, toggle_custom,
                 weights, min_score_for_telegram, telegram_chat_id, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19, now())
             ON CONFLICT (user_id) DO UPDATE SET
                notification_mode = $2, watch_tags = $3, ignore_tags = $4,
                first_time_sender = $5, thread_reply = $6, deadline_alerts = $7,
                subscription_payment_alerts = $8,
                toggle_financial = $9, toggle_marketing = $10, toggle_security = $11,
                toggle_deadline = $12, toggle_work = $13, toggle_personal = $14,
                toggle_legal = $15, toggle_custom = $16,
                weights = $17, min_score_for_telegram = $18, telegram_chat_id = $19,
                updated_at = now()",
            &[
                &user_id,
                &filters.notification_mode,
                &watch_tags,
                &ignore_tags,
                &filters.first_time_sender,
                &filters.thread_reply,
                &filters.deadline_alerts,
                &filters.subscription_payment_alerts,
                &filters.toggles.financial,
                &filters.toggles.marketing,
                &filters.toggles.security,
                &filters.toggles.deadline,
                &filters.toggles.work,
                &filters.toggles.personal,
                &filters.toggles.legal,
                &filters.toggles.custom,
                &weights,
                &min_score,
                &filters.telegram_chat_id,
            ],
        )?;
        Ok(())
    }

    /// Resolve which user a Telegram chat belongs to (action callbacks only
    /// carry the chat id).
    pub fn find_user_by_chat(&self, chat_id: i64) -> Result<Option<Uuid>, FilterStoreError> {
        let mut conn = self.conn()?;
        let row = conn.query_opt(
            "SELECT user_id FROM filter_configs WHERE telegram_chat_id = $1",
            &[&chat_id],
        )?;
        Ok(row.map(|row| row.get(0)))
    }

    pub fn custom_categories(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CustomCategory>, FilterStoreError> {
        let mut conn = self.conn()?;
        let rows = conn.query(
            "SELECT id, user_id, category, user_facing_category, description, weight
             FROM custom_categories WHERE user_id = $1 ORDER BY created_at",
            &[&user_id],
        )?;
        Ok(rows
            .iter()
            .map(|row| {
                let weight: i32 = row.get(5);
                CustomCategory {
                    id: row.get(0),
                    user_id: row.get(1),
                    category: row.get(2),
                    user_facing_category: row.get(3),
                    description: row.get(4),
                    weight: weight.clamp(0, 100) as u8,
                }
            })
            .collect())
    }

    pub fn insert_custom_category(
        &self,
        user_id: Uuid,
        category: &str,
        user_facing_category: &str,
        description: &str,
        weight: u8,
    ) -> Result<CustomCategory, FilterStoreError> {
        let mut conn = self.conn()?;
        let id = Uuid::new_v4();
        let weight_i32 = i32::from(weight);
        conn.execute(
            "INSERT INTO custom_categories
                (id, user_id, category, user_facing_category, description, weight)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, category) DO UPDATE SET
                user_facing_category = $4, description = $5, weight = $6",
            &[
                &id,
                &user_id,
                &category,
                &user_facing_category,
                &description,
                &weight_i32,
            ],
        )?;
        Ok(CustomCategory {
            id,
            user_id,
            category: category.to_string(),
            user_facing_category: user_facing_category.to_string(),
            description: description.to_string(),
            weight,
        })
    }

    pub fn delete_custom_category(
        &self,
        user_id: Uuid,
        category: &str,
    ) -> Result<(), FilterStoreError> {
        let mut conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM custom_categories WHERE user_id = $1 AND category = $2",
            &[&user_id, &category],
        )?;
        if deleted == 0 {
            return Err(FilterStoreError::NotFound);
        }
        Ok(())
    }
}

impl Drop for FilterStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            std::thread::spawn(move || drop(pool));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_with_conservative_threshold() {
        let filters = FilterConfig::default();
        assert!(filters.toggles.financial);
        assert!(filters.toggles.custom);
        assert!(filters.weights.is_empty());
        assert_eq!(filters.min_score_for_telegram, 70);
        assert!(filters.telegram_chat_id.is_none());
    }
}
