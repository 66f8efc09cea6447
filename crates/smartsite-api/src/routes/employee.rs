//! Routes for single employees.

use axum::extract::{Path, State};
use axum::http::header::ETAG;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use smartsite_company::application::{command_handlers, query_handlers};
use smartsite_company::domain::aggregates::EmployeeRole;
use smartsite_company::domain::commands;

use crate::error::ApiError;
use crate::routes::{etag, expected_version, performed_by};
use crate::state::AppState;

/// Request body for changing the roles of an employee.
#[derive(Debug, Deserialize)]
pub struct UpdateEmployeeRequest {
    /// The new roles.
    pub roles: Vec<EmployeeRole>,
}

/// GET /{employee_id}
async fn get_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view =
        query_handlers::get_employee_by_id(employee_id, state.backend.as_ref(), &state.companies)
            .await?;
    Ok(([(ETAG, etag(view.version)?)], Json(view)))
}

/// PUT /{employee_id}
#[instrument(skip(state, headers, request))]
async fn update_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateEmployeeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::UpdateEmployee {
        identifier: employee_id,
        expected_version: expected_version(&headers)?,
        roles: request.roles,
        performed_by: performed_by(&headers)?,
    };
    let outcome =
        command_handlers::handle_update_employee(&command, &state.bus, &state.companies.employees)
            .await?;
    let version = etag(outcome.version())?;
    Ok((
        [(ETAG, version)],
        Json(query_handlers::EmployeeView::from(outcome.snapshot)),
    ))
}

/// DELETE /{employee_id}
#[instrument(skip(state, headers))]
async fn delete_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let command = commands::DeleteEmployee {
        identifier: employee_id,
        expected_version: expected_version(&headers)?,
        performed_by: performed_by(&headers)?,
    };
    command_handlers::handle_delete_employee(&command, &state.bus, &state.companies.employees)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the router for employees.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{employee_id}",
        get(get_employee).put(update_employee).delete(delete_employee),
    )
}
