use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use usage_ledger::{create_router, ApiState, LedgerConfig, LedgerManager, LedgerStore};

fn test_config(dir: &TempDir) -> LedgerConfig {
    LedgerConfig {
        data_dir: dir.path().to_path_buf(),
        ..LedgerConfig::default()
    }
}

fn test_manager(dir: &TempDir) -> LedgerManager {
    let config = test_config(dir);
    let store = Arc::new(LedgerStore::new(config.data_dir.clone()).expect("open store"));
    LedgerManager::new(store, &config)
}

fn test_router(dir: &TempDir) -> Router {
    let config = test_config(dir);
    let store = Arc::new(LedgerStore::new(config.data_dir.clone()).expect("open store"));
    let manager = LedgerManager::new(store, &config);
    create_router(Arc::new(ApiState::new(manager, config)))
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(value) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .expect("request built"),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request built"),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request handled");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

#[tokio::test]
async fn record_and_evaluate_flow_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/usage/activity",
        Some(json!({"server_id": 100, "server_name": "Guild A"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..2 {
        let (status, body) = send(
            &router,
            Method::POST,
            "/api/usage/record",
            Some(json!({
                "server_id": 100,
                "user_id": 7,
                "username": "alice",
                "from_lang": "ja",
                "to_lang": "en",
                "symbol_count": 42
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["langs_from"], json!(["ja"]));
    }

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/usage/evaluate",
        Some(json!({"server_id": 100, "user_id": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exceeded"], json!(false));

    let (status, body) = send(&router, Method::GET, "/api/usage/users/7/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().expect("stats are plain text");
    assert!(text.contains("User: alice"));
    assert!(text.contains("Daily Accrued: 2"));
    assert!(text.contains("Total Operations: 2"));

    let (status, body) = send(&router, Method::GET, "/api/usage/servers/100/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"][0]["username"], json!("alice"));

    let (status, body) = send(&router, Method::GET, "/api/usage/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbols_processed"], json!(84));
    assert_eq!(body["servers"], json!(1));
    assert_eq!(body["users"], json!(1));
}

#[tokio::test]
async fn recording_against_unknown_server_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/usage/record",
        Some(json!({
            "server_id": 999,
            "user_id": 7,
            "username": "alice",
            "from_lang": "ja",
            "to_lang": "en",
            "symbol_count": 1
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("unregistered_server"));
}

#[tokio::test]
async fn evaluation_fails_closed_for_unknown_entities() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/usage/evaluate",
        Some(json!({"server_id": 1, "user_id": 2})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exceeded"], json!(true));
    assert_eq!(body["reason"], json!("unknown_server"));
}

#[tokio::test]
async fn ban_and_unban_flow_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir);

    send(
        &router,
        Method::POST,
        "/api/usage/activity",
        Some(json!({"server_id": 100, "server_name": "Guild A"})),
    )
    .await;
    send(
        &router,
        Method::POST,
        "/api/usage/record",
        Some(json!({
            "server_id": 100,
            "user_id": 7,
            "username": "alice",
            "from_lang": "ja",
            "to_lang": "en",
            "symbol_count": 1
        })),
    )
    .await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/usage/bans",
        Some(json!({"user_id": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["user_id"], json!(7));

    let (_, body) = send(
        &router,
        Method::POST,
        "/api/usage/evaluate",
        Some(json!({"server_id": 100, "user_id": 7})),
    )
    .await;
    assert_eq!(body["exceeded"], json!(true));
    assert_eq!(body["reason"], json!("banned"));

    let (status, _) = send(&router, Method::DELETE, "/api/usage/bans/7", None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &router,
        Method::POST,
        "/api/usage/evaluate",
        Some(json!({"server_id": 100, "user_id": 7})),
    )
    .await;
    assert_eq!(body["exceeded"], json!(false));

    let (status, _) = send(&router, Method::DELETE, "/api/usage/bans/7", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_reports_service_name() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(&dir);

    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], json!("usage-ledger"));
}

#[test]
fn ledger_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let manager = test_manager(&dir);
        manager.ensure_server(100, "Guild A");
        manager
            .record_operation(100, 7, "alice", "ja", "en", 42)
            .unwrap();
        manager
            .record_operation(100, 7, "alice", "ko", "en", 8)
            .unwrap();
        manager.ban_user(9);
        manager.flush_now().unwrap();
    }

    let manager = test_manager(&dir);
    assert!(!manager.exceeds_quota_or_banned(100, 7));
    assert_eq!(manager.summary().symbols_processed, 50);
    assert_eq!(manager.summary().users, 1);

    let stats = manager.user_stats(7).expect("user restored");
    assert!(stats.contains("Total Operations: 2"));
    assert!(stats.contains("Source Languages: ja, ko"));

    // the persisted ban still holds after restart
    manager.ensure_server(100, "Guild A");
    manager
        .record_operation(100, 9, "mallory", "ja", "en", 1)
        .unwrap();
    assert!(manager.exceeds_quota_or_banned(100, 9));
}
