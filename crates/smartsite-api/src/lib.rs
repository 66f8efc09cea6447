//! Smartsite service: HTTP command intake, startup restore and telemetry.

pub mod config;
pub mod error;
pub mod restore;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;

use crate::state::AppState;

/// Builds the application router. Layers are added by the caller.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/companies", routes::company::router())
        .nest("/api/v1/employees", routes::employee::router())
        .nest("/api/v1/users", routes::user::router())
        .with_state(state)
}
