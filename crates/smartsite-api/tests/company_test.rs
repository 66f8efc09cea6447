//! Integration tests for the company and employee endpoints.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

fn company_body(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "street": "Hauptstr. 1",
        "city": "Berlin",
        "postal_code": "10115",
    })
}

#[tokio::test]
async fn test_create_company_returns_201_with_etag() {
    // Arrange
    let (app, _) = common::build_test_app();

    // Act
    let response = common::post_json(&app, "/api/v1/companies", &company_body("Bau AG")).await;

    // Assert
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.etag(), "0");
    assert_eq!(response.json["name"], "Bau AG");
    assert_eq!(response.json["version"], 0);
}

#[tokio::test]
async fn test_create_company_with_empty_name_returns_400() {
    // Arrange
    let (app, _) = common::build_test_app();

    // Act
    let response = common::post_json(&app, "/api/v1/companies", &company_body("  ")).await;

    // Assert
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json["error"], "validation_error");
}

#[tokio::test]
async fn test_get_company_returns_current_version() {
    // Arrange
    let (app, _) = common::build_test_app();
    let id = common::create_company(&app, "Bau AG").await;

    // Act
    let response = common::get_json(&app, &format!("/api/v1/companies/{id}")).await;

    // Assert
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.etag(), "0");
    assert_eq!(response.json["identifier"], id.as_str());
}

#[tokio::test]
async fn test_get_unknown_company_returns_404() {
    // Arrange
    let (app, _) = common::build_test_app();

    // Act
    let response = common::get_json(
        &app,
        "/api/v1/companies/00000000-0000-0000-0000-000000000001",
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json["error"], "aggregate_not_found");
}

#[tokio::test]
async fn test_update_company_with_matching_version_returns_new_etag() {
    // Arrange
    let (app, _) = common::build_test_app();
    let id = common::create_company(&app, "Bau AG").await;
    let uri = format!("/api/v1/companies/{id}");

    // Act
    let response = common::send(
        &app,
        Method::PUT,
        &uri,
        Some("0"),
        Some(&company_body("Bau GmbH")),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.etag(), "1");
    assert_eq!(response.json["name"], "Bau GmbH");
}

#[tokio::test]
async fn test_update_company_with_stale_version_returns_409() {
    // Arrange
    let (app, _) = common::build_test_app();
    let id = common::create_company(&app, "Bau AG").await;
    let uri = format!("/api/v1/companies/{id}");
    common::send(&app, Method::PUT, &uri, Some("0"), Some(&company_body("Bau GmbH"))).await;

    // Act
    let response = common::send(
        &app,
        Method::PUT,
        &uri,
        Some("0"),
        Some(&company_body("Bau KG")),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json["error"], "concurrency_conflict");
}

#[tokio::test]
async fn test_update_company_without_if_match_returns_400() {
    // Arrange
    let (app, _) = common::build_test_app();
    let id = common::create_company(&app, "Bau AG").await;

    // Act
    let response = common::send(
        &app,
        Method::PUT,
        &format!("/api/v1/companies/{id}"),
        None,
        Some(&company_body("Bau GmbH")),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_employing_a_user_lists_the_employee() {
    // Arrange
    let (app, _) = common::build_test_app();
    let company = common::create_company(&app, "Bau AG").await;
    let user = common::create_user(&app, "ada@example.com").await;

    // Act
    let created = common::post_json(
        &app,
        &format!("/api/v1/companies/{company}/employees"),
        &json!({ "user_identifier": user, "roles": ["FOREMAN"] }),
    )
    .await;
    let listed = common::get_json(&app, &format!("/api/v1/companies/{company}/employees")).await;

    // Assert
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.etag(), "0");
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.json.as_array().unwrap().len(), 1);
    assert_eq!(listed.json[0]["user_identifier"], user.as_str());
    assert_eq!(listed.json[0]["roles"], json!(["FOREMAN"]));
}

#[tokio::test]
async fn test_delete_company_with_employees_returns_422() {
    // Arrange
    let (app, _) = common::build_test_app();
    let company = common::create_company(&app, "Bau AG").await;
    let user = common::create_user(&app, "ada@example.com").await;
    common::post_json(
        &app,
        &format!("/api/v1/companies/{company}/employees"),
        &json!({ "user_identifier": user, "roles": ["COMPANY_ADMIN"] }),
    )
    .await;

    // Act
    let response = common::send(
        &app,
        Method::DELETE,
        &format!("/api/v1/companies/{company}"),
        Some("0"),
        None,
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.json["error"], "precondition_violated");
}

#[tokio::test]
async fn test_delete_employee_then_company_returns_204() {
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
    let employee_id = employee.json["identifier"].as_str().unwrap().to_string();

    // Act
    let employee_deleted = common::send(
        &app,
        Method::DELETE,
        &format!("/api/v1/employees/{employee_id}"),
        Some("0"),
        None,
    )
    .await;
    let company_deleted = common::send(
        &app,
        Method::DELETE,
        &format!("/api/v1/companies/{company}"),
        Some("0"),
        None,
    )
    .await;

    // Assert
    assert_eq!(employee_deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(company_deleted.status, StatusCode::NO_CONTENT);
    let gone = common::get_json(&app, &format!("/api/v1/companies/{company}")).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_employee_roles_bumps_version() {
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
    let employee_id = employee.json["identifier"].as_str().unwrap().to_string();

    // Act
    let response = common::send(
        &app,
        Method::PUT,
        &format!("/api/v1/employees/{employee_id}"),
        Some("0"),
        Some(&json!({ "roles": ["FOREMAN", "CONSTRUCTION_SITE_MANAGER"] })),
    )
    .await;

    // Assert
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.etag(), "1");
}
