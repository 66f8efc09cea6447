//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use smartsite_core::memory::InMemoryBackend;
use smartsite_core::persistence::PersistenceBackend;
use smartsite_test_support::{FixedClock, fixed_time};
use tower::ServiceExt;

use smartsite_api::build_router;
use smartsite_api::state::AppState;

/// Response parts the tests look at.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: serde_json::Value,
}

impl TestResponse {
    /// The ETag header without quotes.
    pub fn etag(&self) -> String {
        self.headers
            .get("etag")
            .expect("response has an ETag")
            .to_str()
            .unwrap()
            .trim_matches('"')
            .to_string()
    }
}

/// Build the full app router on an in-memory backend with a fixed clock.
pub fn build_test_app() -> (Router, InMemoryBackend) {
    let backend = InMemoryBackend::new();
    (build_test_app_on(Arc::new(backend.clone())), backend)
}

/// Build the full app router on `backend`.
pub fn build_test_app_on(backend: Arc<dyn PersistenceBackend>) -> Router {
    let state = AppState::new(backend, Arc::new(FixedClock(fixed_time(0))));
    build_router(state)
}

/// Send a request and collect the response. An empty body reads as `null`.
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    if_match: Option<&str>,
    body: Option<&serde_json::Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(version) = if_match {
        builder = builder.header("if-match", format!("\"{version}\""));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    TestResponse {
        status,
        headers,
        json,
    }
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: &Router, uri: &str, body: &serde_json::Value) -> TestResponse {
    send(app, Method::POST, uri, None, Some(body)).await
}

/// Send a GET request.
pub async fn get_json(app: &Router, uri: &str) -> TestResponse {
    send(app, Method::GET, uri, None, None).await
}

/// Create a company and return its identifier.
pub async fn create_company(app: &Router, name: &str) -> String {
    let response = post_json(
        app,
        "/api/v1/companies",
        &serde_json::json!({
            "name": name,
            "street": "Hauptstr. 1",
            "city": "Berlin",
            "postal_code": "10115",
        }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    response.json["identifier"].as_str().unwrap().to_string()
}

/// Create a user and return its identifier.
pub async fn create_user(app: &Router, email: &str) -> String {
    let response = post_json(
        app,
        "/api/v1/users",
        &serde_json::json!({
            "email": email,
            "first_name": "Ada",
            "last_name": "Lovelace",
        }),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);
    response.json["identifier"].as_str().unwrap().to_string()
}
