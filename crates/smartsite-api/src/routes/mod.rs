//! Route modules organized by bounded context, plus the header handling
//! they share.

use axum::http::header::IF_MATCH;
use axum::http::{HeaderMap, HeaderValue};
use smartsite_core::error::DomainError;
use uuid::Uuid;

use crate::error::ApiError;

pub mod company;
pub mod employee;
pub mod health;
pub mod user;

/// Header naming the acting user.
pub const PERFORMED_BY: &str = "x-performed-by";

/// `ETag` value carrying an aggregate version.
///
/// # Errors
///
/// Never fails for a version; the error exists to satisfy the header API.
pub fn etag(version: i64) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!("\"{version}\""))
        .map_err(|e| ApiError(DomainError::Infrastructure(format!("invalid ETag: {e}"))))
}

/// The version a client expects, taken from `If-Match`.
///
/// # Errors
///
/// Returns a validation error if the header is missing or not a version.
pub fn expected_version(headers: &HeaderMap) -> Result<i64, ApiError> {
    let raw = headers
        .get(IF_MATCH)
        .ok_or_else(|| DomainError::Validation("If-Match header is required".to_string()))?;
    let text = raw
        .to_str()
        .map_err(|_| DomainError::Validation("If-Match header is not valid text".to_string()))?;
    text.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .parse()
        .map_err(|_| ApiError(DomainError::Validation(format!("If-Match is not a version: {text}"))))
}

/// The acting user from `X-Performed-By`; the nil identifier if absent.
///
/// # Errors
///
/// Returns a validation error if the header is not a UUID.
pub fn performed_by(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(PERFORMED_BY)
        .map_or(Ok(Uuid::nil()), |value| {
            value
                .to_str()
                .ok()
                .and_then(|text| Uuid::parse_str(text.trim()).ok())
                .ok_or_else(|| {
                    ApiError(DomainError::Validation(
                        "X-Performed-By must be a UUID".to_string(),
                    ))
                })
        })
}
