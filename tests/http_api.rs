//! HTTP shell: status codes, body shapes and middleware, driven with `oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use credgate::config::Config;
use credgate::policy::{PolicyEngine, PolicyRules};
use credgate::service::CredentialService;
use credgate::store::MemoryStore;
use credgate::vault::SecretCipher;
use credgate::{api, AppState};

fn app_with(config: Config) -> Router {
    let service = CredentialService::new(
        Arc::new(MemoryStore::new()),
        PolicyEngine::new(PolicyRules::default()),
        Arc::new(SecretCipher::ephemeral()),
    );
    api::router(Arc::new(AppState { service, config }))
}

fn app() -> Router {
    app_with(Config::default())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_issue_returns_201_with_secret_once() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/credentials",
        Some(json!({"principal": "svc-a", "scopes": ["read:x"]})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "issued");
    assert_eq!(body["secret"].as_str().unwrap().len(), 40);
    assert!(body["expires_at"].is_string());

    let id = body["credential_id"].as_str().unwrap();
    let (status, summary) = send(&app, "GET", &format!("/credentials/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status"], "active");
    assert_eq!(summary["type"], "api_key");
    assert!(summary.get("secret").is_none());
}

#[tokio::test]
async fn test_pending_then_approve() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/credentials",
        Some(json!({"principal": "svc-a", "scopes": ["write:db"]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["reason"], "needs_approval_prefix_write:*");
    assert!(body.get("secret").is_none());

    let rid = body["request_id"].as_str().unwrap().to_string();
    let (status, approved) = send(&app, "POST", &format!("/requests/{}/approve", rid), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "issued");
    assert_eq!(approved["credential_id"], rid.as_str());

    let (status, again) = send(&app, "POST", &format!("/requests/{}/approve", rid), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["error"]["code"], "not_pending");
}

#[tokio::test]
async fn test_rejections_use_error_shape() {
    let app = app();

    let (status, body) = send(&app, "POST", "/credentials", Some(json!({"scopes": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "principal_required");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let (status, body) = send(
        &app,
        "POST",
        "/credentials",
        Some(json!({"principal": "svc-a", "ttl_seconds": 90000})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "ttl_too_long");

    let (status, body) = send(&app, "POST", "/credentials", Some(json!({"principal": 42}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_body");
}

#[tokio::test]
async fn test_numeric_string_fields_accepted() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/credentials",
        Some(json!({"principal": "svc-a", "ttl_seconds": "600", "length": "48"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["secret"].as_str().unwrap().len(), 48);

    let (status, body) = send(
        &app,
        "POST",
        "/credentials",
        Some(json!({"principal": "svc-a", "ttl_seconds": "9999999999999999"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "ttl_too_long");
}

#[tokio::test]
async fn test_quota_is_403() {
    let app = app();
    for _ in 0..5 {
        let (status, _) = send(&app, "POST", "/credentials", Some(json!({"principal": "svc-a"}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = send(&app, "POST", "/credentials", Some(json!({"principal": "svc-a"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "quota_exceeded");
}

#[tokio::test]
async fn test_revoke_and_list() {
    let app = app();
    let (_, body) = send(&app, "POST", "/credentials", Some(json!({"principal": "svc-a"}))).await;
    let id = body["credential_id"].as_str().unwrap().to_string();

    let (status, revoked) = send(&app, "POST", &format!("/credentials/{}/revoke", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revoked, json!({"status": "revoked", "credential_id": id}));

    // second revoke changes nothing and still succeeds
    let (status, _) = send(&app, "POST", &format!("/credentials/{}/revoke", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, listing) = send(&app, "GET", "/credentials", None).await;
    assert_eq!(status, StatusCode::OK);
    let listing = listing.as_array().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0]["status"], "revoked");
}

#[tokio::test]
async fn test_malformed_and_unknown_ids_are_404() {
    let app = app();
    for uri in [
        "/credentials/not-a-uuid/revoke".to_string(),
        format!("/credentials/{}/revoke", uuid::Uuid::new_v4()),
        "/requests/zzz/approve".to_string(),
    ] {
        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["error"]["code"], "not_found");
    }
}

#[tokio::test]
async fn test_debug_decrypt_only_when_enabled() {
    let app = app();
    let (_, body) = send(&app, "POST", "/credentials", Some(json!({"principal": "svc-a"}))).await;
    let id = body["credential_id"].as_str().unwrap().to_string();
    let (status, _) = send(&app, "GET", &format!("/_debug/decrypt/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let app = app_with(Config {
        enable_debug_decrypt: true,
        ..Config::default()
    });
    let (_, body) = send(&app, "POST", "/credentials", Some(json!({"principal": "svc-a"}))).await;
    let id = body["credential_id"].as_str().unwrap().to_string();
    let secret = body["secret"].as_str().unwrap().to_string();

    let (status, revealed) = send(&app, "GET", &format!("/_debug/decrypt/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(revealed["secret_plaintext"], secret.as_str());

    let (_, body) = send(
        &app,
        "POST",
        "/credentials",
        Some(json!({"principal": "svc-a", "scopes": ["admin"]})),
    )
    .await;
    let rid = body["request_id"].as_str().unwrap();
    let (status, err) = send(&app, "GET", &format!("/_debug/decrypt/{}", rid), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["code"], "secret_not_set");
}

#[tokio::test]
async fn test_health_metrics_and_headers() {
    let app = app();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-request-id"], "abc-123");
    assert_eq!(resp.headers()["cache-control"], "no-store");
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));

    send(&app, "POST", "/credentials", Some(json!({"principal": "svc-m"}))).await;
    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("credgate_credentials_issued_total"));
}
