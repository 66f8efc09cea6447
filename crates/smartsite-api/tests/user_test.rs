//! Integration tests for the user endpoints and the employment view.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn test_create_user_returns_unregistered_user() {
    // Arrange
    let (app, _) = common::build_test_app();

    // Act
    let response = common::post_json(
        &app,
        "/api/v1/users",
        &json!({ "email": "ada@example.com", "first_name": "Ada", "last_name": "Lovelace" }),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.etag(), "0");
    assert_eq!(response.json["registered"], false);
}

#[tokio::test]
async fn test_create_user_with_taken_email_returns_422() {
    // Arrange
    let (app, _) = common::build_test_app();
    common::create_user(&app, "ada@example.com").await;

    // Act
    let response = common::post_json(
        &app,
        "/api/v1/users",
        &json!({ "email": "ada@example.com", "first_name": "Ada", "last_name": "Byron" }),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_register_user_sets_registered_and_bumps_version() {
    // Arrange
    let (app, _) = common::build_test_app();
    let id = common::create_user(&app, "ada@example.com").await;

    // Act
    let response = common::send(
        &app,
        Method::POST,
        &format!("/api/v1/users/{id}/registration"),
        Some("0"),
        None,
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.etag(), "1");
    assert_eq!(response.json["registered"], true);
}

#[tokio::test]
async fn test_performed_by_must_be_a_uuid() {
    // Arrange
    let (app, _) = common::build_test_app();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/users")
        .header("content-type", "application/json")
        .header("x-performed-by", "someone")
        .body(axum::body::Body::from(
            json!({ "email": "ada@example.com", "first_name": "Ada", "last_name": "Lovelace" })
                .to_string(),
        ))
        .unwrap();

    // Act
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_employment_view_joins_user_and_company() {
    // Arrange
    let (app, _) = common::build_test_app();
    let company = common::create_company(&app, "Bau AG").await;
    let user = common::create_user(&app, "ada@example.com").await;
    let employee = common::post_json(
        &app,
        &format!("/api/v1/companies/{company}/employees"),
        &json!({ "user_identifier": user, "roles": ["FOREMAN"] }),
    )
    .await;

    // Act
    let response = common::get_json(&app, &format!("/api/v1/users/{user}/employment")).await;

    // Assert
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json["user_name"], "Ada Lovelace");
    assert_eq!(response.json["email"], "ada@example.com");
    assert_eq!(response.json["company_identifier"], company.as_str());
    assert_eq!(response.json["company_name"], "Bau AG");
    assert_eq!(response.json["employee_identifier"], employee.json["identifier"]);
}

#[tokio::test]
async fn test_company_rename_reaches_employable_users_of_company() {
    // Arrange
    let (app, _) = common::build_test_app();
    let company = common::create_company(&app, "Bau AG").await;
    let user = common::create_user(&app, "ada@example.com").await;
    common::post_json(
        &app,
        &format!("/api/v1/companies/{company}/employees"),
        &json!({ "user_identifier": user, "roles": ["FOREMAN"] }),
    )
    .await;

    // Act
    common::send(
        &app,
        Method::PUT,
        &format!("/api/v1/companies/{company}"),
        Some("0"),
        Some(&json!({
            "name": "Bau GmbH",
            "street": "Hauptstr. 1",
            "city": "Berlin",
            "postal_code": "10115",
        })),
    )
    .await;
    let response = common::get_json(
        &app,
        &format!("/api/v1/companies/{company}/employable-users"),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json.as_array().unwrap().len(), 1);
    assert_eq!(response.json[0]["company_name"], "Bau GmbH");
}

#[tokio::test]
async fn test_deleted_user_returns_404() {
    // Arrange
    let (app, _) = common::build_test_app();
    let id = common::create_user(&app, "ada@example.com").await;

    // Act
    let deleted = common::send(
        &app,
        Method::DELETE,
        &format!("/api/v1/users/{id}"),
        Some("0"),
        None,
    )
    .await;
    let response = common::get_json(&app, &format!("/api/v1/users/{id}")).await;

    // Assert
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
