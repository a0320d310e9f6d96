//! API integration tests.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::test_app;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_sessions_start_empty() {
    let app = test_app();

    let response = app.oneshot(get("/api/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["sessions"], json!([]));
}

#[tokio::test]
async fn test_shells_listing_includes_sh() {
    let app = test_app();

    let response = app.oneshot(get("/api/sessions/shells")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let shells = json["shells"].as_array().unwrap();
    assert!(shells.iter().any(|s| s["id"] == "sh"));
    for shell in shells {
        assert!(shell["name"].is_string());
        assert!(shell["path"].is_string());
    }
}

#[tokio::test]
async fn test_create_rejects_invalid_name() {
    let app = test_app();

    let response = app
        .oneshot(post_json("/api/sessions", json!({ "name": "bad name!" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_create_rejects_unknown_shell() {
    let app = test_app();

    let response = app
        .oneshot(post_json(
            "/api/sessions",
            json!({ "name": "dev", "shell": "powershell" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(
        json["error"].as_str().unwrap().contains("powershell"),
        "error should name the missing shell: {json}"
    );
}

#[tokio::test]
async fn test_create_reports_backend_spawn_failure() {
    let app = test_app();

    // The configured backend binary does not exist, so the spawn fails and
    // the session must not be registered.
    let response = app
        .clone()
        .oneshot(post_json("/api/sessions", json!({ "name": "dev" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/sessions")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["sessions"], json!([]));
}

#[tokio::test]
async fn test_stop_unknown_session() {
    let app = test_app();

    let response = app
        .oneshot(post_json("/api/sessions/ghost/stop", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_restart_unknown_session() {
    let app = test_app();

    let response = app
        .oneshot(post_json("/api/sessions/ghost/restart", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_unknown_session() {
    let app = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sessions/ghost")
                .method(Method::DELETE)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_terminal_proxy_unknown_session() {
    let app = test_app();

    let response = app.oneshot(get("/terminal/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("ghost"));
}
