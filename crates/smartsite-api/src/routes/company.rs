//! Routes for companies and their employees.

use axum::extract::{Path, State};
use axum::http::header::ETAG;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
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

/// Request body for creating or updating a company.
#[derive(Debug, Deserialize)]
pub struct CompanyRequest {
    /// Identifier to create the company with; generated if absent.
    #[serde(default)]
    pub identifier: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Street and house number.
    pub street: String,
    /// City.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
}

/// Request body for employing a user.
#[derive(Debug, Deserialize)]
pub struct CreateEmployeeRequest {
    /// Identifier to create the employee with; generated if absent.
    #[serde(default)]
    pub identifier: Option<Uuid>,
    /// The user to employ.
    pub user_identifier: Uuid,
    /// Roles within the company.
    pub roles: Vec<EmployeeRole>,
}

/// POST /
#[instrument(skip(state, headers, request), fields(name = %request.name))]
async fn create_company(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::CreateCompany {
        identifier: request.identifier,
        name: request.name,
        street: request.street,
        city: request.city,
        postal_code: request.postal_code,
        performed_by: performed_by(&headers)?,
    };
    let outcome =
        command_handlers::handle_create_company(&command, &state.bus, &state.companies.companies)
            .await?;
    let version = etag(outcome.version())?;
    Ok((
        StatusCode::CREATED,
        [(ETAG, version)],
        Json(query_handlers::CompanyView::from(outcome.snapshot)),
    ))
}

/// GET /{company_id}
async fn get_company(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view =
        query_handlers::get_company_by_id(company_id, state.backend.as_ref(), &state.companies)
            .await?;
    Ok(([(ETAG, etag(view.version)?)], Json(view)))
}

/// PUT /{company_id}
#[instrument(skip(state, headers, request))]
async fn update_company(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::UpdateCompany {
        identifier: company_id,
        expected_version: expected_version(&headers)?,
        name: request.name,
        street: request.street,
        city: request.city,
        postal_code: request.postal_code,
        performed_by: performed_by(&headers)?,
    };
    let outcome =
        command_handlers::handle_update_company(&command, &state.bus, &state.companies.companies)
            .await?;
    let version = etag(outcome.version())?;
    Ok((
        [(ETAG, version)],
        Json(query_handlers::CompanyView::from(outcome.snapshot)),
    ))
}

/// DELETE /{company_id}
#[instrument(skip(state, headers))]
async fn delete_company(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let command = commands::DeleteCompany {
        identifier: company_id,
        expected_version: expected_version(&headers)?,
        performed_by: performed_by(&headers)?,
    };
    command_handlers::handle_delete_company(&command, &state.bus, &state.companies.companies)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /{company_id}/employees
async fn list_employees(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<query_handlers::EmployeeView>>, ApiError> {
    let employees = query_handlers::list_employees_of_company(
        company_id,
        state.backend.as_ref(),
        &state.companies,
    )
    .await?;
    Ok(Json(employees))
}

/// POST /{company_id}/employees
#[instrument(skip(state, headers, request), fields(user = %request.user_identifier))]
async fn create_employee(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<CreateEmployeeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::CreateEmployee {
        identifier: request.identifier,
        company_identifier: company_id,
        user_identifier: request.user_identifier,
        roles: request.roles,
        performed_by: performed_by(&headers)?,
    };
    let outcome = command_handlers::handle_create_employee(
        &command,
        &state.bus,
        &state.companies.companies,
        &state.companies.employees,
    )
    .await?;
    let version = etag(outcome.version())?;
    Ok((
        StatusCode::CREATED,
        [(ETAG, version)],
        Json(query_handlers::EmployeeView::from(outcome.snapshot)),
    ))
}

/// GET /{company_id}/employable-users
async fn list_employable_users(
    State(state): State<AppState>,
    Path(company_id): Path<Uuid>,
) -> Result<Json<Vec<query_handlers::EmployableUserView>>, ApiError> {
    let users = query_handlers::list_employable_users_of_company(
        company_id,
        state.backend.as_ref(),
        &state.companies,
    )
    .await?;
    Ok(Json(users))
}

/// Returns the router for companies.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_company))
        .route(
            "/{company_id}",
            get(get_company).put(update_company).delete(delete_company),
        )
        .route(
            "/{company_id}/employees",
            get(list_employees).post(create_employee),
        )
        .route("/{company_id}/employable-users", get(list_employable_users))
}
