//! HTTP 接口测试

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use policy_engine::InMemoryRuleStore;
use policy_engine::api::{self, AppState};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> Router {
    api::router(AppState::in_memory(InMemoryRuleStore::new()))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn deny_rule() -> Value {
    json!({
        "id": "block-banned",
        "domain": "access",
        "name": "block banned users",
        "message": "account suspended",
        "condition": {"fact": "user.banned", "operator": "eq", "value": true},
        "accessConfig": {"priorityGroup": "deny"}
    })
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rules"]["rulesCount"], 0);
}

#[tokio::test]
async fn test_rule_lifecycle_drives_access_checks() {
    let app = app();

    let (status, body) = send(&app, "POST", "/api/v1/rules", Some(deny_rule())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "block-banned");
    assert_eq!(body["data"]["requiredFacts"], json!(["user.banned"]));

    let check = json!({
        "facts": {"user": {"banned": true}},
        "defaultDecision": "GRANTED"
    });
    let (_, body) = send(&app, "POST", "/api/v1/access/check", Some(check.clone())).await;
    assert_eq!(body["data"]["decision"], "DENIED");

    let (status, _) = send(&app, "DELETE", "/api/v1/rules/block-banned", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "POST", "/api/v1/access/check", Some(check)).await;
    assert_eq!(body["data"]["decision"], "GRANTED");

    let (status, body) = send(&app, "GET", "/api/v1/rules/block-banned", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "RULE_NOT_FOUND");
}

#[tokio::test]
async fn test_duplicate_rule_is_conflict() {
    let app = app();
    send(&app, "POST", "/api/v1/rules", Some(deny_rule())).await;

    let (status, body) = send(&app, "POST", "/api/v1/rules", Some(deny_rule())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "RULE_ALREADY_EXISTS");
}

#[tokio::test]
async fn test_invalid_rules_are_rejected() {
    let app = app();

    let mut malformed = deny_rule();
    malformed["condition"] = json!({"type": "compare", "op": "between", "lhs": 1, "rhs": 2});
    let (status, body) = send(&app, "POST", "/api/v1/rules", Some(malformed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONDITION_PARSE_ERROR");

    let mut inconsistent = deny_rule();
    inconsistent["targetScope"] = json!("ENTITY_TYPE");
    let (status, body) = send(&app, "POST", "/api/v1/rules", Some(inconsistent)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "DATA_INTEGRITY_WARNING");

    let mut unnamed = deny_rule();
    unnamed["name"] = json!("");
    let (status, body) = send(&app, "POST", "/api/v1/rules", Some(unnamed)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_update_and_list_by_domain() {
    let app = app();
    send(&app, "POST", "/api/v1/rules", Some(deny_rule())).await;

    let mut updated = deny_rule();
    updated["priority"] = json!(7);
    let (status, body) = send(&app, "PUT", "/api/v1/rules/block-banned", Some(updated)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["priority"], 7);

    let (status, _) = send(&app, "PUT", "/api/v1/rules/unknown", Some(deny_rule())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "GET", "/api/v1/rules?domain=access", None).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    let (_, body) = send(&app, "GET", "/api/v1/rules?domain=pricing", None).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_evaluate_pricing_requires_base_amount() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/evaluate",
        Some(json!({"domain": "pricing", "facts": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/evaluate",
        Some(json!({
            "domain": "pricing",
            "context": {
                "baseAmount": {
                    "amount": 10000,
                    "currency": {"code": "USD", "base": 10, "exponent": 2},
                    "scale": 2
                }
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"]["finalAmount"]["amount"], 10000);
    assert_eq!(body["data"]["stale"], false);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}
