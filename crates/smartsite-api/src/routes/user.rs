//! Routes for users.

use axum::extract::{Path, State};
use axum::http::header::ETAG;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use smartsite_company::application::query_handlers::{EmployableUserView, get_employable_user};
use smartsite_user::application::{command_handlers, query_handlers};
use smartsite_user::domain::commands;

use crate::error::ApiError;
use crate::routes::{etag, expected_version, performed_by};
use crate::state::AppState;

/// Request body for creating a user.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// Identifier to create the user with; generated if absent.
    #[serde(default)]
    pub identifier: Option<Uuid>,
    /// E-mail address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
}

/// Request body for updating a user.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    /// E-mail address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Whether the user is locked.
    #[serde(default)]
    pub locked: bool,
}

/// POST /
#[instrument(skip(state, headers, request))]
async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::CreateUser {
        identifier: request.identifier,
        email: request.email,
        first_name: request.first_name,
        last_name: request.last_name,
        performed_by: performed_by(&headers)?,
    };
    let outcome =
        command_handlers::handle_create_user(&command, &state.bus, &state.users.users).await?;
    let version = etag(outcome.version())?;
    Ok((
        StatusCode::CREATED,
        [(ETAG, version)],
        Json(query_handlers::UserView::from(outcome.snapshot)),
    ))
}

/// GET /{user_id}
async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view =
        query_handlers::get_user_by_id(user_id, state.backend.as_ref(), &state.users.users)
            .await?;
    Ok(([(ETAG, etag(view.version)?)], Json(view)))
}

/// PUT /{user_id}
#[instrument(skip(state, headers, request))]
async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::UpdateUser {
        identifier: user_id,
        expected_version: expected_version(&headers)?,
        email: request.email,
        first_name: request.first_name,
        last_name: request.last_name,
        locked: request.locked,
        performed_by: performed_by(&headers)?,
    };
    let outcome =
        command_handlers::handle_update_user(&command, &state.bus, &state.users.users).await?;
    let version = etag(outcome.version())?;
    Ok((
        [(ETAG, version)],
        Json(query_handlers::UserView::from(outcome.snapshot)),
    ))
}

/// POST /{user_id}/registration
#[instrument(skip(state, headers))]
async fn register_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::RegisterUser {
        identifier: user_id,
        expected_version: expected_version(&headers)?,
        performed_by: performed_by(&headers)?,
    };
    let outcome =
        command_handlers::handle_register_user(&command, &state.bus, &state.users.users).await?;
    let version = etag(outcome.version())?;
    Ok((
        [(ETAG, version)],
        Json(query_handlers::UserView::from(outcome.snapshot)),
    ))
}

/// DELETE /{user_id}
#[instrument(skip(state, headers))]
async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let command = commands::DeleteUser {
        identifier: user_id,
        expected_version: expected_version(&headers)?,
        performed_by: performed_by(&headers)?,
    };
    command_handlers::handle_delete_user(&command, &state.bus, &state.users.users).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /{user_id}/employment
async fn get_employment(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<EmployableUserView>, ApiError> {
    let view = get_employable_user(user_id, state.backend.as_ref(), &state.companies).await?;
    Ok(Json(view))
}

/// Returns the router for users.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user))
        .route(
            "/{user_id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/{user_id}/registration", post(register_user))
        .route("/{user_id}/employment", get(get_employment))
}
