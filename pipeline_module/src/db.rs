//! Shared Postgres pool construction for the row stores.

use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use std::env;
use tracing::error;

pub type PgPool = Pool<PostgresConnectionManager<MakeTlsConnector>>;
pub type PgConn = PooledConnection<PostgresConnectionManager<MakeTlsConnector>>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("db config error: {0}")]
    Config(String),
}

/// Custom error handler that logs the actual connection error
#[derive(Debug)]
struct LoggingErrorHandler {
    store: &'static str,
}

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("{} postgres pool error: {:?}", self.store, err);
    }
}

pub fn build_pool(db_url: &str, store: &'static str, max_size: u32) -> Result<PgPool, DbError> {
    let config: postgres::Config = db_url.parse()?;

    let mut tls_builder = native_tls::TlsConnector::builder();
    if env::var("PIPELINE_DB_TLS_ALLOW_INVALID_CERTS")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
    {
        tls_builder.danger_accept_invalid_certs(true);
        tls_builder.danger_accept_invalid_hostnames(true);
    }
    let tls_connector = tls_builder
        .build()
        .map_err(|err| DbError::Config(err.to_string()))?;
    let tls = MakeTlsConnector::new(tls_connector);

    let manager = PostgresConnectionManager::new(config, tls);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(std::time::Duration::from_secs(5))
        .idle_timeout(Some(std::time::Duration::from_secs(300)))
        .error_handler(Box::new(LoggingErrorHandler { store }))
        .build(manager)?;
    Ok(pool)
}
