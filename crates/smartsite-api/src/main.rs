//! Smartsite API server entry point.

use std::sync::Arc;

use smartsite_api::config::ServiceConfig;
use smartsite_api::error::AppError;
use smartsite_api::state::AppState;
use smartsite_api::telemetry::Telemetry;
use smartsite_core::clock::SystemClock;
use smartsite_event_store::PgBackend;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = ServiceConfig::from_env()?;
    let telemetry = Telemetry::init(config.otlp_endpoint.as_deref())?;

    tracing::info!("Starting Smartsite API server");

    let result = run(&config).await;
    if let Err(error) = &result {
        tracing::error!(%error, "Server stopped with an error");
    }
    telemetry.shutdown();
    result
}

async fn run(config: &ServiceConfig) -> Result<(), AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;

    let backend = PgBackend::new(pool);
    let state = AppState::new(Arc::new(backend.clone()), Arc::new(SystemClock));

    if config.restore_db_on_startup {
        let report =
            smartsite_api::restore::restore_database(Arc::new(backend), &state, config).await?;
        tracing::info!(
            processed = report.processed,
            parked = report.parked,
            "Database restored"
        );
    }

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = smartsite_api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.socket_addr()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "Failed to listen for the shutdown signal");
    }
}
