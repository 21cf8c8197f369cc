#[path = "gateway/handlers.rs"]
mod handlers;
#[path = "gateway/state.rs"]
mod state;
#[path = "gateway/update.rs"]
mod update;
#[path = "gateway/verify.rs"]
mod verify;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use pipeline_module::config::ServiceConfig;
use pipeline_module::scoring;

use handlers::{dispatch_reminder, health, ingest_gmail, ingest_telegram};
use state::build_state;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    // Fail fast if the category taxonomy and the prefix table ever drift.
    scoring::validate_taxonomy()?;

    let config = ServiceConfig::from_env()?;
    let host = config.host.clone();
    let port = config.port;

    let state = Arc::new(build_state(config)?);

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/webhooks/gmail", post(ingest_gmail))
        .route("/webhooks/telegram", post(ingest_telegram))
        .route("/reminders/dispatch", post(dispatch_reminder))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{host}:{port}");
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("could not install ctrl-c handler: {}", err);
    }
}
