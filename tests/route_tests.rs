mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use std::sync::Arc;
use stratus::context::EngineSettings;
use stratus::registry::ModuleRegistry;
use stratus::server::{StratusState, stratus_router};
use stratus::service::{self, EngineArgs};
use tower::ServiceExt;

const API_KEY: &str = "test-key";

async fn app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let engine = service::spawn(EngineArgs {
        registry: ModuleRegistry::builtin().expect("builtin registry is valid"),
        data_dir: dir.path().to_path_buf(),
        connector: Arc::new(common::quiet_cloud()),
        settings: EngineSettings::fast(),
        default_regions: vec!["us-east-1".to_string()],
    })
    .await
    .expect("failed to spawn engine");
    let state = StratusState::new(engine, Arc::from(API_KEY));
    (dir, stratus_router(state))
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-api-key", API_KEY)
                .body(Body::from(body.to_string()))
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn requests_need_the_api_key() {
    let (_dir, app) = app().await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/module/list")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key("x-request-id"));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/module/list")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let body: Value = serde_json::from_slice(&bytes).expect("json error body");
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["error"]["message"], "invalid API key");

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/module/list")
                .header("authorization", format!("Bearer {API_KEY}"))
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-request-id"], "req-42");

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/v1/nowhere")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn module_and_target_flow() {
    let (_dir, app) = app().await;

    let (status, body) = post(&app, "/v1/module/list", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["available"],
        json!(["aws_ec2", "aws_security_group", "aws_sns", "aws_vpc"])
    );
    assert!(body.get("installed").is_none());

    let (status, body) = post(&app, "/v1/module/install", json!({ "target": "prod", "modules": ["aws_vpc"] })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "UNKNOWN_TARGET");

    let (status, body) = post(
        &app,
        "/v1/target/connect",
        json!({
            "target": "prod",
            "credentials": { "access_key_id": "AKID", "secret_access_key": "secret" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["regions"], json!(["us-east-1"]));

    let (status, body) = post(
        &app,
        "/v1/target/connect",
        json!({
            "target": "prod",
            "credentials": { "access_key_id": "AKID", "secret_access_key": "secret" },
            "regions": ["mars-north-1"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = post(
        &app,
        "/v1/module/install",
        json!({ "target": "prod", "modules": ["aws_vpc", "aws_nope"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UNKNOWN_MODULE");

    let (status, body) = post(
        &app,
        "/v1/module/install",
        json!({ "target": "prod", "modules": ["aws_vpc"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["installed"], json!(["aws_vpc"]));
    assert_eq!(body["sync"]["direction"], "sync");

    let (_, body) = post(&app, "/v1/module/list", json!({ "target": "prod" })).await;
    assert_eq!(body["installed"], json!(["aws_vpc"]));

    let (status, body) = post(&app, "/v1/target/plan", json!({ "target": "prod" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["direction"], "apply");

    let (status, body) = post(&app, "/v1/target/apply", json!({ "target": "prod" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failures"]["failures"], 0);

    let (status, _) = post(&app, "/v1/target/sync", json!({ "target": "prod" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&app, "/v1/module/show", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));

    let (status, body) = post(
        &app,
        "/v1/module/remove",
        json!({ "target": "prod", "modules": ["aws_vpc"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], json!(["aws_vpc"]));

    let (status, _) = post(&app, "/v1/target/disconnect", json!({ "target": "prod" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&app, "/v1/target/apply", json!({ "target": "prod" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
